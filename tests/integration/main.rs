//! meshhub integration test harness.
//!
//! Every test starts real hubs on loopback inside the test process and
//! talks to them over TCP. Timings are shortened so gossip and retries
//! settle within a second or two.
//!
//!   cargo test --test integration
//!
//! Hubs bind OS-assigned ports, so tests can run in parallel.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::net::TcpStream;

use meshhub_core::wire::{self, Frame, Opcode};
use meshhub_core::{Address, ClientDescription, Gossip, HubSummary};
use meshhub_overlay::{Hub, HubConfig, HubDescription};

// ── Harness ───────────────────────────────────────────────────────────────────

/// How long any single condition may take to become true.
pub const SETTLE: Duration = Duration::from_secs(10);

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Loopback hub config with fast gossip and retries.
pub fn fast_config(seeds: &[&Address]) -> HubConfig {
    HubConfig {
        seeds: seeds.iter().map(|a| (*a).clone()).collect(),
        gossip_interval: Duration::from_millis(100),
        retry_delay: Duration::from_millis(200),
        connect_timeout: CONNECT_TIMEOUT,
        ..HubConfig::loopback()
    }
}

pub async fn start_hub(seeds: &[&Address]) -> Result<Hub> {
    Hub::start(fast_config(seeds))
        .await
        .context("hub failed to start")
}

/// Start a hub on a port picked beforehand with `reserve_port`.
pub async fn start_hub_on(port: u16, seeds: &[&Address]) -> Result<Hub> {
    Hub::start(HubConfig {
        port,
        ..fast_config(seeds)
    })
    .await
    .with_context(|| format!("hub failed to start on port {port}"))
}

/// Find a free loopback port. The listener is dropped, so the port is only
/// probably free; good enough on a test machine.
pub fn reserve_port() -> Result<u16> {
    let l = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(l.local_addr()?.port())
}

pub fn loopback(port: u16) -> Address {
    Address::new(format!("127.0.0.1:{port}"))
}

/// Poll `cond` until it holds or `SETTLE` passes.
pub async fn wait_for(what: &str, mut cond: impl FnMut() -> bool) -> Result<()> {
    let deadline = tokio::time::Instant::now() + SETTLE;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    bail!("timed out waiting for {what}")
}

/// `hub`'s description of `peer`, if it knows it.
pub fn view(hub: &Hub, peer: &Address) -> Option<std::sync::Arc<HubDescription>> {
    hub.hub_list().get(peer)
}

/// Both hubs hold a live connection to each other.
pub fn linked(a: &Hub, b: &Hub) -> bool {
    let a_has = view(a, b.address()).map(|d| d.have_connection()).unwrap_or(false);
    let b_has = view(b, a.address()).map(|d| d.have_connection()).unwrap_or(false);
    a_has && b_has
}

/// A hand-driven peer speaking the hub protocol over a raw socket. It
/// claims `address` in its handshake but does not listen there.
pub struct FakeHub {
    pub address: Address,
    pub stream: TcpStream,
}

impl FakeHub {
    /// Open a hub connection to `hub` and return the reply opcode.
    pub async fn connect(hub: &Hub, address: &Address) -> Result<(Self, Opcode)> {
        let mut stream = TcpStream::connect(hub.address().as_str()).await?;
        wire::write_handshake(&mut stream, Opcode::HubConnect, &[address.as_str()]).await?;
        let reply = tokio::time::timeout(CONNECT_TIMEOUT, wire::read_opcode(&mut stream))
            .await
            .context("no handshake reply")??;
        Ok((
            Self {
                address: address.clone(),
                stream,
            },
            reply,
        ))
    }

    /// Gossip our own entry.
    pub async fn gossip(&mut self, home_state: u64, clients: Vec<ClientDescription>) -> Result<()> {
        let message = Gossip {
            sender: self.address.clone(),
            state: home_state,
            hubs: vec![HubSummary {
                address: self.address.clone(),
                name: "fake".into(),
                home_state,
                hops: 0,
                clients,
                connected_to: Vec::new(),
            }],
        };
        wire::write_frame(&mut self.stream, Opcode::Gossip, Some(&message)).await?;
        Ok(())
    }

    pub async fn next_frame(&mut self) -> Result<Frame> {
        let frame = tokio::time::timeout(SETTLE, wire::read_frame(&mut self.stream))
            .await
            .context("no frame from hub")??;
        Ok(frame)
    }

    pub async fn disconnect(mut self) -> Result<()> {
        wire::write_frame::<_, ()>(&mut self.stream, Opcode::Disconnect, None).await?;
        Ok(())
    }
}

/// A client entry with one service.
pub fn client_with(address: &str, tag: &str, info: &str) -> ClientDescription {
    let mut c = ClientDescription::new(Address::from(address));
    c.add_service(tag, info);
    c
}

mod clients;
mod discovery;
mod protocol;
mod race;
