//! Inbound connection handling.
//!
//! The accept loop only accepts and queues; handshakes run on a fixed pool
//! of workers so a slow peer cannot stall the listener. Each worker reads
//! the leading opcode and dispatches:
//!   - HUB_CONNECT          → gate, then ACCEPTED or REFUSED
//!   - SERVICELINK_CONNECT  → register the client unless it is a duplicate
//!   - PING                 → read the sender address and drop
//!   - GET_SPLICE_INFO      → reply with the caller's observed IP and port

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};

use meshhub_core::wire::{self, Opcode};
use meshhub_core::{Address, ClientDescription};

use crate::connection::{ClientConnection, HubConnection, Origin};
use crate::error::HubError;
use crate::hub::HubContext;
use crate::transport::with_timeout;

/// A raw accepted stream waiting for a worker.
pub struct Incoming {
    pub stream: TcpStream,
    pub remote: SocketAddr,
}

/// Bounded hand-off between the accept loop and the workers.
#[derive(Clone)]
pub struct IncomingQueue {
    tx: mpsc::Sender<Incoming>,
    rx: Arc<Mutex<mpsc::Receiver<Incoming>>>,
}

impl IncomingQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Waits while the queue is full. False once the workers are gone.
    pub async fn add_incoming(&self, incoming: Incoming) -> bool {
        self.tx.send(incoming).await.is_ok()
    }

    pub async fn get_incoming(&self) -> Option<Incoming> {
        self.rx.lock().await.recv().await
    }
}

// ── Accept loop ───────────────────────────────────────────────────────────────

pub struct Acceptor {
    listener: TcpListener,
    queue: IncomingQueue,
    shutdown: broadcast::Receiver<()>,
}

impl Acceptor {
    pub fn new(
        listener: TcpListener,
        queue: IncomingQueue,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            listener,
            queue,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("acceptor shutting down");
                    return;
                }

                result = self.listener.accept() => {
                    let (stream, remote) = match result {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    tracing::trace!(%remote, "accepted");
                    if !self.queue.add_incoming(Incoming { stream, remote }).await {
                        return;
                    }
                }
            }
        }
    }
}

// ── Workers ───────────────────────────────────────────────────────────────────

pub struct AcceptorWorker {
    id: usize,
    ctx: Arc<HubContext>,
    queue: IncomingQueue,
    shutdown: broadcast::Receiver<()>,
}

impl AcceptorWorker {
    pub fn new(
        id: usize,
        ctx: Arc<HubContext>,
        queue: IncomingQueue,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            id,
            ctx,
            queue,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        loop {
            let incoming = tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::debug!(worker = self.id, "acceptor worker shutting down");
                    return;
                }
                next = self.queue.get_incoming() => match next {
                    Some(i) => i,
                    None => return,
                },
            };

            let remote = incoming.remote;
            if let Err(e) = handle_incoming(&self.ctx, incoming).await {
                tracing::debug!(worker = self.id, %remote, error = %e, "inbound connection dropped");
            }
        }
    }
}

/// Complete the handshake on one freshly accepted stream.
pub async fn handle_incoming(ctx: &Arc<HubContext>, incoming: Incoming) -> Result<(), HubError> {
    let Incoming { stream, remote } = incoming;
    let local = stream.local_addr().ok();
    let (mut reader, mut writer) = stream.into_split();
    let limit = ctx.connect_timeout;

    let opcode = with_timeout(limit, async { Ok(wire::read_opcode(&mut reader).await?) }).await?;
    match opcode {
        Opcode::HubConnect => {
            let peer = with_timeout(limit, async { Ok(wire::read_string(&mut reader).await?) }).await?;
            accept_hub(ctx, Address::new(peer), reader, writer, local, remote).await
        }
        Opcode::ServicelinkConnect => {
            let client = with_timeout(limit, async { Ok(wire::read_string(&mut reader).await?) }).await?;
            accept_client(ctx, Address::new(client), reader, writer, remote).await
        }
        Opcode::Ping => {
            let from = with_timeout(limit, async { Ok(wire::read_string(&mut reader).await?) }).await?;
            tracing::trace!(from = %from, %remote, "ping");
            Ok(())
        }
        Opcode::GetSpliceInfo => {
            with_timeout(limit, async {
                wire::write_string(&mut writer, &remote.ip().to_string()).await?;
                writer.write_u16(remote.port()).await?;
                writer.flush().await?;
                Ok(())
            })
            .await?;
            tracing::debug!(%remote, "answered splice info");
            Ok(())
        }
        other => Err(HubError::UnexpectedOpcode(other)),
    }
}

async fn accept_hub(
    ctx: &Arc<HubContext>,
    peer: Address,
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    local: Option<SocketAddr>,
    remote: SocketAddr,
) -> Result<(), HubError> {
    let d = ctx.hub_list.add(&peer);
    if d.is_local() {
        tracing::warn!(%remote, "refusing hub connection claiming our own address");
        let mut writer = writer;
        wire::write_opcode(&mut writer, Opcode::ConnectionRefused).await?;
        return Ok(());
    }
    d.set_can_reach_me();

    let conn = Arc::new(HubConnection::new(
        ctx.connections.next_id(),
        peer.clone(),
        Origin::Inbound,
        local,
        Some(remote),
        writer,
    ));

    if !d.create_connection(conn.clone()) {
        tracing::debug!(peer = %peer, "hub already connected, refusing");
        with_timeout(ctx.connect_timeout, conn.send_opcode(Opcode::ConnectionRefused)).await?;
        return Ok(());
    }

    if let Err(e) = with_timeout(ctx.connect_timeout, conn.send_opcode(Opcode::ConnectionAccepted)).await {
        d.remove_connection(&conn);
        return Err(e);
    }

    d.mark_contact();
    ctx.local().add_connected_to(peer.as_str());
    ctx.connections.put_hub(conn.clone());
    conn.activate(Box::new(reader), ctx.clone());
    tracing::info!(peer = %peer, %remote, "hub connection accepted");

    if let Err(e) = conn.gossip(ctx).await {
        tracing::warn!(peer = %peer, error = %e, "initial gossip failed");
    }
    Ok(())
}

async fn accept_client(
    ctx: &Arc<HubContext>,
    client: Address,
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    remote: SocketAddr,
) -> Result<(), HubError> {
    let conn = Arc::new(ClientConnection::new(
        ctx.connections.next_id(),
        client.clone(),
        Some(remote),
        writer,
    ));

    if !ctx.connections.try_put_client(conn.clone()) {
        tracing::debug!(client = %client, "client already connected, refusing");
        with_timeout(ctx.connect_timeout, conn.send_opcode(Opcode::ConnectionRefused)).await?;
        return Ok(());
    }

    // Registered before the reply so the client can rely on it once
    // accepted.
    ctx.local().add_client(ClientDescription::new(client.clone()));
    if let Err(e) = with_timeout(ctx.connect_timeout, conn.send_opcode(Opcode::ConnectionAccepted)).await {
        if ctx.connections.remove_client_if_same(&client, conn.id()) {
            ctx.local().remove_client(&client);
        }
        return Err(e);
    }

    conn.activate(Box::new(reader), ctx.clone());
    tracing::info!(client = %client, %remote, "client connected");
    Ok(())
}
