//! The hub orchestrator: binds the listener and runs the accept loop,
//! acceptor workers, connectors and the gossip loop.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use meshhub_core::config::MeshConfig;
use meshhub_core::{Address, StateCounter};

use crate::acceptor::{Acceptor, AcceptorWorker, IncomingQueue};
use crate::connections::Connections;
use crate::connector::Connector;
use crate::description::HubDescription;
use crate::error::HubError;
use crate::hub_list::{HubList, RETRY_DELAY};
use crate::selector::ConnectedSelector;
use crate::transport::{self, SocketFactory};

/// Log a status snapshot every this many gossip rounds.
const STATUS_EVERY_ROUNDS: u64 = 10;

// ── Runtime configuration ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub name: String,
    pub bind: IpAddr,
    pub port: u16,
    /// Host part of our address. `None` = detect from the bind address.
    pub advertise_host: Option<String>,
    pub seeds: Vec<Address>,
    pub backlog: u32,
    pub connectors: usize,
    pub acceptor_workers: usize,
    pub incoming_queue: usize,
    pub gossip_interval: Duration,
    pub retry_delay: Duration,
    pub connect_timeout: Duration,
    pub address_file: Option<PathBuf>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            bind: IpAddr::from([0, 0, 0, 0]),
            port: meshhub_core::config::DEFAULT_HUB_PORT,
            advertise_host: None,
            seeds: Vec::new(),
            backlog: 256,
            connectors: 1,
            acceptor_workers: 4,
            incoming_queue: 64,
            gossip_interval: Duration::from_secs(3),
            retry_delay: RETRY_DELAY,
            connect_timeout: Duration::from_secs(5),
            address_file: None,
        }
    }
}

impl HubConfig {
    pub fn from_config(config: &MeshConfig) -> Result<Self, HubError> {
        let bind: IpAddr = config
            .network
            .bind
            .parse()
            .map_err(|_| HubError::InvalidBindAddress(config.network.bind.clone()))?;
        let host = config.network.advertise_host.trim();
        Ok(Self {
            name: config.hub.name.clone(),
            bind,
            port: config.network.port,
            advertise_host: (!host.is_empty()).then(|| host.to_string()),
            seeds: config
                .network
                .seeds
                .iter()
                .map(|s| Address::new(s.as_str()))
                .collect(),
            backlog: config.network.backlog,
            connectors: config.hub.connectors.max(1),
            acceptor_workers: config.hub.acceptor_workers.max(1),
            incoming_queue: config.hub.incoming_queue.max(1),
            gossip_interval: config.timing.gossip_interval(),
            retry_delay: config.timing.retry_delay(),
            connect_timeout: config.timing.connect_timeout(),
            address_file: config.network.address_file.clone(),
        })
    }

    /// Loopback hub on an OS-assigned port. Handy for tests and tools.
    pub fn loopback() -> Self {
        Self {
            bind: IpAddr::from([127, 0, 0, 1]),
            port: 0,
            ..Self::default()
        }
    }
}

// ── Shared context ────────────────────────────────────────────────────────────

/// Everything the hub's tasks share.
pub struct HubContext {
    pub local_address: Address,
    pub counter: Arc<StateCounter>,
    pub hub_list: Arc<HubList>,
    pub connections: Connections,
    pub factory: SocketFactory,
    pub connect_timeout: Duration,
}

impl HubContext {
    pub fn new(
        local_address: Address,
        name: &str,
        counter: Arc<StateCounter>,
        retry_delay: Duration,
        factory: SocketFactory,
    ) -> Self {
        let local = Arc::new(HubDescription::new_local(
            local_address.clone(),
            name,
            counter.clone(),
        ));
        let hub_list = Arc::new(HubList::new(local, counter.clone(), retry_delay));
        Self {
            local_address,
            counter,
            hub_list,
            connections: Connections::new(),
            connect_timeout: factory.connect_timeout(),
            factory,
        }
    }

    pub fn local(&self) -> &Arc<HubDescription> {
        self.hub_list.local()
    }

    #[cfg(test)]
    pub(crate) fn for_tests(local_address: Address) -> Self {
        Self::new(
            local_address,
            "test",
            Arc::new(StateCounter::new()),
            RETRY_DELAY,
            SocketFactory::new(Duration::from_secs(2)),
        )
    }
}

// ── Hub ───────────────────────────────────────────────────────────────────────

pub struct Hub {
    ctx: Arc<HubContext>,
    shutdown: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl Hub {
    /// Bind the listener and start every task. Failing to bind is the only
    /// fatal error; everything after that is handled inside the tasks.
    pub async fn start(config: HubConfig) -> Result<Self, HubError> {
        let factory = SocketFactory::new(config.connect_timeout);
        let listener = factory.create_server_socket(config.bind, config.port, config.backlog)?;
        let port = listener.local_addr()?.port();

        let address = match &config.advertise_host {
            Some(host) => match host.parse::<IpAddr>() {
                Ok(ip) => Address::from(SocketAddr::new(ip, port)),
                Err(_) => Address::new(format!("{host}:{port}")),
            },
            None => Address::from(SocketAddr::new(transport::detect_host(config.bind), port)),
        };

        let counter = Arc::new(StateCounter::new());
        let ctx = Arc::new(HubContext::new(
            address.clone(),
            &config.name,
            counter,
            config.retry_delay,
            factory,
        ));
        tracing::info!(address = %address, name = %config.name, "hub listening");

        if let Some(path) = &config.address_file {
            tokio::fs::write(path, address.as_str()).await?;
            tracing::debug!(path = %path.display(), "address file written");
        }

        for seed in &config.seeds {
            if *seed != address {
                ctx.hub_list.add(seed);
            }
        }

        let (shutdown, _) = broadcast::channel(1);
        let queue = IncomingQueue::new(config.incoming_queue);
        let mut tasks = Vec::new();

        tasks.push(tokio::spawn(
            Acceptor::new(listener, queue.clone(), shutdown.subscribe()).run(),
        ));
        for id in 0..config.acceptor_workers {
            tasks.push(tokio::spawn(
                AcceptorWorker::new(id, ctx.clone(), queue.clone(), shutdown.subscribe()).run(),
            ));
        }
        for id in 0..config.connectors {
            tasks.push(tokio::spawn(
                Connector::new(id, ctx.clone(), shutdown.subscribe()).run(),
            ));
        }
        tasks.push(tokio::spawn(gossip_loop(
            ctx.clone(),
            config.gossip_interval,
            shutdown.subscribe(),
        )));

        Ok(Self {
            ctx,
            shutdown,
            tasks,
        })
    }

    pub fn address(&self) -> &Address {
        &self.ctx.local_address
    }

    pub fn context(&self) -> &Arc<HubContext> {
        &self.ctx
    }

    pub fn hub_list(&self) -> &Arc<HubList> {
        &self.ctx.hub_list
    }

    pub fn connections(&self) -> &Connections {
        &self.ctx.connections
    }

    pub fn local(&self) -> &Arc<HubDescription> {
        self.ctx.local()
    }

    /// Queue a hub for checking, as if it had been a seed.
    pub fn add_hub(&self, address: &Address) -> Arc<HubDescription> {
        self.ctx.hub_list.add(address)
    }

    /// Stop every task and close all connections.
    pub async fn end(self) {
        let _ = self.shutdown.send(());
        self.ctx.hub_list.close();

        for conn in self.ctx.connections.hub_connections() {
            if let Err(e) = conn.disconnect().await {
                tracing::debug!(peer = %conn.peer(), error = %e, "disconnect failed");
            }
        }
        for conn in self.ctx.connections.client_connections() {
            if let Err(e) = conn.disconnect().await {
                tracing::debug!(client = %conn.peer(), error = %e, "disconnect failed");
            }
        }

        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "hub task failed");
            }
        }
        tracing::info!(address = %self.ctx.local_address, "hub stopped");
    }
}

async fn gossip_loop(
    ctx: Arc<HubContext>,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut rounds: u64 = 0;

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!("gossip loop shutting down");
                return;
            }
            _ = interval.tick() => {}
        }

        let mut selector = ConnectedSelector::default();
        ctx.hub_list.select(&mut selector);
        for conn in selector.connections {
            if let Err(e) = conn.gossip(&ctx).await {
                tracing::warn!(peer = %conn.peer(), error = %e, "gossip failed");
            }
        }

        rounds += 1;
        if rounds % STATUS_EVERY_ROUNDS == 0 {
            let (must_check, connected) = ctx.hub_list.queue_lengths();
            tracing::info!(
                hubs = ctx.hub_list.len(),
                hub_connections = ctx.connections.hub_count(),
                clients = ctx.connections.client_count(),
                must_check,
                connected,
                state = ctx.counter.get(),
                "status"
            );
        }
    }
}
