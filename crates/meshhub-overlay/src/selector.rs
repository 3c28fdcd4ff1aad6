//! Visitors over the set of known hubs.
//!
//! `HubList::select` walks its descriptions once and hands each one that
//! matches the selector's predicates to `select`. Gossip target selection,
//! status dumps, client lookups and gossip deltas all share that one
//! traversal.

use std::sync::Arc;

use meshhub_core::{Address, ClientDescription, HubSummary};

use crate::connection::HubConnection;
use crate::description::{HubDescription, HubInfo};

/// A description is passed to `select` if `needs_all()`, or
/// `needs_connected()` and it has a live connection, or `needs_local()`
/// and it is the local description.
pub trait Selector {
    fn needs_all(&self) -> bool {
        false
    }

    fn needs_local(&self) -> bool {
        false
    }

    fn needs_connected(&self) -> bool {
        false
    }

    fn select(&mut self, description: &Arc<HubDescription>);
}

/// Live hub connections. Drives gossip rounds.
#[derive(Default)]
pub struct ConnectedSelector {
    pub connections: Vec<Arc<HubConnection>>,
}

impl Selector for ConnectedSelector {
    fn needs_connected(&self) -> bool {
        true
    }

    fn select(&mut self, description: &Arc<HubDescription>) {
        if let Some(conn) = description.connection() {
            self.connections.push(conn);
        }
    }
}

/// The local description only. Answered without scanning the registry.
#[derive(Default)]
pub struct LocalSelector {
    pub info: Option<HubInfo>,
}

impl Selector for LocalSelector {
    fn needs_local(&self) -> bool {
        true
    }

    fn select(&mut self, description: &Arc<HubDescription>) {
        self.info = Some(description.snapshot());
    }
}

/// Snapshot of every known hub, sorted by address.
#[derive(Default)]
pub struct HubInfoSelector {
    pub hubs: Vec<HubInfo>,
}

impl Selector for HubInfoSelector {
    fn needs_all(&self) -> bool {
        true
    }

    fn select(&mut self, description: &Arc<HubDescription>) {
        let pos = self
            .hubs
            .binary_search_by(|h| h.address.as_str().cmp(description.address().as_str()))
            .unwrap_or_else(|p| p);
        self.hubs.insert(pos, description.snapshot());
    }
}

/// Details of one hub.
pub struct HubDetailsSelector {
    address: Address,
    pub result: Option<HubInfo>,
}

impl HubDetailsSelector {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            result: None,
        }
    }
}

impl Selector for HubDetailsSelector {
    fn needs_all(&self) -> bool {
        true
    }

    fn select(&mut self, description: &Arc<HubDescription>) {
        if description.address() == &self.address {
            self.result = Some(description.snapshot());
        }
    }
}

/// Which hub hosts a given client.
pub struct ClientSelector {
    client: Address,
    pub hub: Option<Address>,
}

impl ClientSelector {
    pub fn new(client: Address) -> Self {
        Self { client, hub: None }
    }
}

impl Selector for ClientSelector {
    fn needs_all(&self) -> bool {
        true
    }

    fn select(&mut self, description: &Arc<HubDescription>) {
        if self.hub.is_none() && description.has_client(&self.client) {
            self.hub = Some(description.address().clone());
        }
    }
}

/// Every known client with the hub it is registered at.
#[derive(Default)]
pub struct ClientListSelector {
    pub clients: Vec<(Address, ClientDescription)>,
}

impl Selector for ClientListSelector {
    fn needs_all(&self) -> bool {
        true
    }

    fn select(&mut self, description: &Arc<HubDescription>) {
        for client in description.clients() {
            self.clients.push((description.address().clone(), client));
        }
    }
}

/// Gossip entries for descriptions that changed after `since`.
///
/// Hubs we never heard anything about (no connection, no home state) are
/// left out; there is nothing to tell.
pub struct StateSelector {
    since: u64,
    pub summaries: Vec<HubSummary>,
}

impl StateSelector {
    pub fn new(since: u64) -> Self {
        Self {
            since,
            summaries: Vec::new(),
        }
    }
}

impl Selector for StateSelector {
    fn needs_all(&self) -> bool {
        true
    }

    fn select(&mut self, description: &Arc<HubDescription>) {
        if description.last_local_update() <= self.since {
            return;
        }
        if !description.is_local()
            && !description.have_connection()
            && description.home_state() == 0
        {
            return;
        }
        self.summaries.push(description.summary());
    }
}
