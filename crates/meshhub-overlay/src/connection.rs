//! Established hub and client connections.
//!
//! A connection owns the write half of its socket behind an async mutex so
//! the gossip task and handshake code can share it. The read half is moved
//! into a task by `activate`; when that task sees EOF, an error, or a
//! DISCONNECT frame it tears the connection down and unregisters it.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use meshhub_core::wire::{self, Opcode};
use meshhub_core::{Address, Gossip, ServiceAdd, ServiceRemove};

use crate::error::HubError;
use crate::gossip;
use crate::hub::HubContext;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Which side opened the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Inbound,
    Outbound,
}

// ── Hub connections ───────────────────────────────────────────────────────────

pub struct HubConnection {
    id: u64,
    peer: Address,
    origin: Origin,
    local_socket: Option<SocketAddr>,
    remote_socket: Option<SocketAddr>,
    established_at: Instant,
    writer: Mutex<BoxedWriter>,
    /// Counter value at which the last gossip on this connection was built.
    last_sent_state: AtomicU64,
    /// Set once the handshake is over and the read loop runs. Nothing but
    /// handshake bytes may be written before that.
    active: AtomicBool,
    closed: AtomicBool,
}

impl HubConnection {
    pub fn new(
        id: u64,
        peer: Address,
        origin: Origin,
        local_socket: Option<SocketAddr>,
        remote_socket: Option<SocketAddr>,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            id,
            peer,
            origin,
            local_socket,
            remote_socket,
            established_at: Instant::now(),
            writer: Mutex::new(Box::new(writer)),
            last_sent_state: AtomicU64::new(0),
            active: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> &Address {
        &self.peer
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn local_socket(&self) -> Option<SocketAddr> {
        self.local_socket
    }

    pub fn remote_socket(&self) -> Option<SocketAddr> {
        self.remote_socket
    }

    pub fn established_at(&self) -> Instant {
        self.established_at
    }

    pub fn last_sent_state(&self) -> u64 {
        self.last_sent_state.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Raw handshake message on this socket (opcode plus strings).
    pub async fn write_handshake(&self, opcode: Opcode, args: &[&str]) -> Result<(), HubError> {
        let mut w = self.writer.lock().await;
        wire::write_handshake(&mut *w, opcode, args).await?;
        Ok(())
    }

    pub async fn send_opcode(&self, opcode: Opcode) -> Result<(), HubError> {
        let mut w = self.writer.lock().await;
        wire::write_opcode(&mut *w, opcode).await?;
        Ok(())
    }

    async fn send_frame<T: Serialize>(
        &self,
        opcode: Opcode,
        payload: Option<&T>,
    ) -> Result<(), HubError> {
        let mut w = self.writer.lock().await;
        wire::write_frame(&mut *w, opcode, payload).await?;
        Ok(())
    }

    /// Send everything that changed since the last gossip on this
    /// connection. Returns the number of entries sent; nothing goes out when
    /// there is nothing new.
    pub async fn gossip(&self, ctx: &HubContext) -> Result<usize, HubError> {
        if !self.is_active() || self.is_closed() {
            return Ok(0);
        }
        // Read the counter before selecting: anything touched concurrently
        // is sent now or again next round, never skipped.
        let upto = ctx.counter.get();
        let since = self.last_sent_state();
        let message = gossip::build(ctx, since);
        let entries = message.hubs.len();
        if entries > 0 {
            self.send_frame(Opcode::Gossip, Some(&message)).await?;
            tracing::trace!(peer = %self.peer, entries, since, "gossip sent");
        }
        self.last_sent_state.fetch_max(upto, Ordering::AcqRel);
        Ok(entries)
    }

    /// Tell the peer we are leaving and close our write half. The read task
    /// tears the rest down when the peer closes its side.
    pub async fn disconnect(&self) -> Result<(), HubError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut w = self.writer.lock().await;
        wire::write_frame::<_, ()>(&mut *w, Opcode::Disconnect, None).await?;
        w.shutdown().await?;
        Ok(())
    }

    async fn shutdown_writer(&self) {
        self.closed.store(true, Ordering::Release);
        let mut w = self.writer.lock().await;
        if let Err(e) = w.shutdown().await {
            tracing::trace!(peer = %self.peer, error = %e, "shutdown after close");
        }
    }

    /// Start the read loop for an established connection.
    pub fn activate(self: &Arc<Self>, reader: BoxedReader, ctx: Arc<HubContext>) -> JoinHandle<()> {
        self.active.store(true, Ordering::Release);
        let conn = self.clone();
        tokio::spawn(async move { conn.read_loop(reader, ctx).await })
    }

    async fn read_loop(self: Arc<Self>, mut reader: BoxedReader, ctx: Arc<HubContext>) {
        loop {
            let frame = match wire::read_frame(&mut reader).await {
                Ok(f) => f,
                Err(e) if e.is_eof() => {
                    tracing::debug!(peer = %self.peer, "hub connection closed by peer");
                    break;
                }
                Err(e) => {
                    tracing::warn!(peer = %self.peer, error = %e, "hub connection read failed");
                    break;
                }
            };

            match frame.opcode {
                Opcode::Gossip => match frame.decode::<Gossip>() {
                    Ok(message) => gossip::apply(&ctx, &self.peer, message),
                    Err(e) => {
                        tracing::warn!(peer = %self.peer, error = %e, "malformed gossip");
                        break;
                    }
                },
                Opcode::Disconnect => {
                    tracing::debug!(peer = %self.peer, "peer disconnected");
                    break;
                }
                other => {
                    tracing::warn!(peer = %self.peer, opcode = ?other, "unexpected frame on hub connection");
                    break;
                }
            }
        }

        self.shutdown_writer().await;
        self.teardown(&ctx);
    }

    fn teardown(&self, ctx: &HubContext) {
        let Some(d) = ctx.hub_list.get(&self.peer) else {
            ctx.connections.remove_hub_if_same(&self.peer, self.id);
            return;
        };
        if !d.remove_connection(self) {
            // Never won the gate, or already replaced.
            ctx.connections.remove_hub_if_same(&self.peer, self.id);
            return;
        }
        ctx.connections.remove_hub_if_same(&self.peer, self.id);
        ctx.local().remove_connected_to(self.peer.as_str());
        ctx.hub_list.connection_lost(&d);
        tracing::info!(peer = %self.peer, id = self.id, "hub connection torn down");
    }
}

impl std::fmt::Debug for HubConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubConnection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("origin", &self.origin)
            .field("remote_socket", &self.remote_socket)
            .finish()
    }
}

// ── Client connections ────────────────────────────────────────────────────────

pub struct ClientConnection {
    id: u64,
    peer: Address,
    remote_socket: Option<SocketAddr>,
    established_at: Instant,
    writer: Mutex<BoxedWriter>,
}

impl ClientConnection {
    pub fn new(
        id: u64,
        peer: Address,
        remote_socket: Option<SocketAddr>,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            id,
            peer,
            remote_socket,
            established_at: Instant::now(),
            writer: Mutex::new(Box::new(writer)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> &Address {
        &self.peer
    }

    pub fn remote_socket(&self) -> Option<SocketAddr> {
        self.remote_socket
    }

    pub fn established_at(&self) -> Instant {
        self.established_at
    }

    pub async fn send_opcode(&self, opcode: Opcode) -> Result<(), HubError> {
        let mut w = self.writer.lock().await;
        wire::write_opcode(&mut *w, opcode).await?;
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<(), HubError> {
        let mut w = self.writer.lock().await;
        wire::write_frame::<_, ()>(&mut *w, Opcode::Disconnect, None).await?;
        w.shutdown().await?;
        Ok(())
    }

    pub fn activate(self: &Arc<Self>, reader: BoxedReader, ctx: Arc<HubContext>) -> JoinHandle<()> {
        let conn = self.clone();
        tokio::spawn(async move { conn.read_loop(reader, ctx).await })
    }

    async fn read_loop(self: Arc<Self>, mut reader: BoxedReader, ctx: Arc<HubContext>) {
        let local = ctx.local().clone();
        loop {
            let frame = match wire::read_frame(&mut reader).await {
                Ok(f) => f,
                Err(e) if e.is_eof() => break,
                Err(e) => {
                    tracing::warn!(client = %self.peer, error = %e, "client connection read failed");
                    break;
                }
            };

            match frame.opcode {
                Opcode::ServiceAdd => match frame.decode::<ServiceAdd>() {
                    Ok(add) => {
                        local.client_service_added(&self.peer, &add.tag, &add.info);
                        tracing::debug!(client = %self.peer, tag = %add.tag, "service added");
                    }
                    Err(e) => {
                        tracing::warn!(client = %self.peer, error = %e, "malformed service add");
                        break;
                    }
                },
                Opcode::ServiceRemove => match frame.decode::<ServiceRemove>() {
                    Ok(rm) => {
                        local.client_service_removed(&self.peer, &rm.tag);
                        tracing::debug!(client = %self.peer, tag = %rm.tag, "service removed");
                    }
                    Err(e) => {
                        tracing::warn!(client = %self.peer, error = %e, "malformed service remove");
                        break;
                    }
                },
                Opcode::Disconnect => break,
                other => {
                    tracing::warn!(client = %self.peer, opcode = ?other, "unexpected frame on client connection");
                    break;
                }
            }
        }

        {
            let mut w = self.writer.lock().await;
            if let Err(e) = w.shutdown().await {
                tracing::trace!(client = %self.peer, error = %e, "shutdown after close");
            }
        }
        if ctx.connections.remove_client_if_same(&self.peer, self.id) {
            local.remove_client(&self.peer);
            tracing::info!(client = %self.peer, "client disconnected");
        }
    }
}
