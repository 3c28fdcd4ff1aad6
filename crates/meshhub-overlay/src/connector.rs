//! Outbound connection attempts and the master/slave race protocol.
//!
//! Two hubs that try to connect to each other at the same moment must end
//! up with exactly one connection. The hub with the smaller address is the
//! master and claims its description's gate *before* handshaking; the slave
//! handshakes first and claims the gate only once the master accepted. The
//! master's acceptor therefore refuses the slave's attempt whenever the
//! master's own attempt is in flight, and the slave's acceptor is free to
//! take the master's.

use std::sync::Arc;

use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::broadcast;

use meshhub_core::wire::{self, Opcode};

use crate::connection::{HubConnection, Origin};
use crate::description::HubDescription;
use crate::error::HubError;
use crate::hub::HubContext;
use crate::transport::with_timeout;

/// How a setup attempt ended when no I/O error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// A new connection is live.
    Established,
    /// The peer refused; it already has a connection to us.
    Refused,
    /// Our own gate was taken by an inbound connection meanwhile.
    AlreadyConnected,
}

pub struct Connector {
    id: usize,
    ctx: Arc<HubContext>,
    shutdown: broadcast::Receiver<()>,
}

impl Connector {
    pub fn new(id: usize, ctx: Arc<HubContext>, shutdown: broadcast::Receiver<()>) -> Self {
        Self { id, ctx, shutdown }
    }

    pub async fn run(mut self) {
        loop {
            let d = tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::debug!(connector = self.id, "connector shutting down");
                    return;
                }
                next = self.ctx.hub_list.next_hub_to_check() => match next {
                    Some(d) => d,
                    None => return,
                },
            };

            check(&self.ctx, &d).await;
            self.ctx.hub_list.put_back(&d);
        }
    }
}

/// One pass over a hub taken off the queue. The caller puts it back.
pub async fn check(ctx: &Arc<HubContext>, d: &Arc<HubDescription>) {
    d.mark_connect_attempt();

    if d.have_connection() {
        test_reachability(ctx, d).await;
        return;
    }

    let master = ctx.local_address.is_master_over(d.address());
    let result = if master {
        connect_as_master(ctx, d).await
    } else {
        connect_as_slave(ctx, d).await
    };

    match result {
        Ok(Attempt::Established) => {}
        Ok(Attempt::Refused) => {
            tracing::debug!(peer = %d.address(), master, "connection refused, peer already linked");
        }
        Ok(Attempt::AlreadyConnected) => {
            // The socket opened, so the peer is reachable regardless.
            d.set_reachable();
        }
        Err(e) => {
            d.set_unreachable();
            tracing::debug!(peer = %d.address(), error = %e, "hub unreachable");
        }
    }
}

/// Probe an already connected hub with a throwaway PING connection.
pub async fn test_reachability(ctx: &HubContext, d: &HubDescription) {
    match send_ping(ctx, d).await {
        Ok(()) => d.set_reachable(),
        Err(e) => {
            d.set_unreachable();
            tracing::debug!(peer = %d.address(), error = %e, "reachability test failed");
        }
    }
}

async fn send_ping(ctx: &HubContext, d: &HubDescription) -> Result<(), HubError> {
    let mut stream = ctx.factory.create_socket(d.address()).await?;
    with_timeout(ctx.connect_timeout, async {
        wire::write_handshake(&mut stream, Opcode::Ping, &[ctx.local_address.as_str()]).await?;
        Ok(())
    })
    .await
}

async fn connect_as_master(
    ctx: &Arc<HubContext>,
    d: &Arc<HubDescription>,
) -> Result<Attempt, HubError> {
    let stream = ctx.factory.create_socket(d.address()).await?;
    let local = stream.local_addr().ok();
    let remote = stream.peer_addr().ok();
    let (mut reader, writer) = stream.into_split();

    let conn = Arc::new(HubConnection::new(
        ctx.connections.next_id(),
        d.address().clone(),
        Origin::Outbound,
        local,
        remote,
        writer,
    ));

    if !d.create_connection(conn.clone()) {
        // Salvage the socket as a ping so the peer sees us.
        with_timeout(
            ctx.connect_timeout,
            conn.write_handshake(Opcode::Ping, &[ctx.local_address.as_str()]),
        )
        .await?;
        return Ok(Attempt::AlreadyConnected);
    }

    let reply = with_timeout(ctx.connect_timeout, async {
        conn.write_handshake(Opcode::HubConnect, &[ctx.local_address.as_str()])
            .await?;
        Ok(wire::read_opcode(&mut reader).await?)
    })
    .await;

    match reply {
        Ok(Opcode::ConnectionAccepted) => {
            established(ctx, d, conn, reader, "master").await;
            Ok(Attempt::Established)
        }
        Ok(Opcode::ConnectionRefused) => {
            d.remove_connection(&conn);
            Ok(Attempt::Refused)
        }
        Ok(other) => {
            d.remove_connection(&conn);
            Err(HubError::UnexpectedOpcode(other))
        }
        Err(e) => {
            d.remove_connection(&conn);
            Err(e)
        }
    }
}

async fn connect_as_slave(
    ctx: &Arc<HubContext>,
    d: &Arc<HubDescription>,
) -> Result<Attempt, HubError> {
    let stream = ctx.factory.create_socket(d.address()).await?;
    let local = stream.local_addr().ok();
    let remote = stream.peer_addr().ok();
    let (mut reader, mut writer) = stream.into_split();

    let reply = with_timeout(ctx.connect_timeout, async {
        wire::write_handshake(&mut writer, Opcode::HubConnect, &[ctx.local_address.as_str()])
            .await?;
        Ok(wire::read_opcode(&mut reader).await?)
    })
    .await?;

    match reply {
        Opcode::ConnectionAccepted => {}
        Opcode::ConnectionRefused => return Ok(Attempt::Refused),
        other => return Err(HubError::UnexpectedOpcode(other)),
    }

    let conn = Arc::new(HubConnection::new(
        ctx.connections.next_id(),
        d.address().clone(),
        Origin::Outbound,
        local,
        remote,
        writer,
    ));

    if !d.create_connection(conn.clone()) {
        // The master accepted us, so it cannot have had a connection in
        // flight, and ours to it would have been refused.
        tracing::error!(
            peer = %d.address(),
            "connection race lost as slave after peer accepted; closing"
        );
        if let Err(e) = conn.disconnect().await {
            tracing::debug!(peer = %d.address(), error = %e, "disconnect failed");
        }
        return Ok(Attempt::AlreadyConnected);
    }

    established(ctx, d, conn, reader, "slave").await;
    Ok(Attempt::Established)
}

async fn established(
    ctx: &Arc<HubContext>,
    d: &Arc<HubDescription>,
    conn: Arc<HubConnection>,
    reader: OwnedReadHalf,
    role: &'static str,
) {
    d.set_reachable();
    d.mark_contact();
    ctx.local().add_connected_to(d.address().as_str());
    ctx.connections.put_hub(conn.clone());
    conn.activate(Box::new(reader), ctx.clone());
    tracing::info!(peer = %d.address(), role, id = conn.id(), "hub connection established");

    if let Err(e) = conn.gossip(ctx).await {
        tracing::warn!(peer = %d.address(), error = %e, "initial gossip failed");
    }
}
