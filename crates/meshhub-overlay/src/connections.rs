//! Live connections, keyed by peer address.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use meshhub_core::Address;

use crate::connection::{ClientConnection, HubConnection};

/// Either kind of established connection.
#[derive(Clone)]
pub enum Connection {
    Hub(Arc<HubConnection>),
    Client(Arc<ClientConnection>),
}

impl Connection {
    pub fn id(&self) -> u64 {
        match self {
            Connection::Hub(c) => c.id(),
            Connection::Client(c) => c.id(),
        }
    }

    pub fn peer(&self) -> &Address {
        match self {
            Connection::Hub(c) => c.peer(),
            Connection::Client(c) => c.peer(),
        }
    }
}

/// Hub and client connections. Cloning shares the same tables.
#[derive(Clone, Default)]
pub struct Connections {
    hubs: Arc<DashMap<Address, Arc<HubConnection>>>,
    clients: Arc<DashMap<Address, Arc<ClientConnection>>>,
    next_id: Arc<AtomicU64>,
}

impl Connections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh connection id. Ids start at 1 and are never reused.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn get_hub(&self, address: &Address) -> Option<Arc<HubConnection>> {
        self.hubs.get(address).map(|e| e.value().clone())
    }

    pub fn get_client(&self, address: &Address) -> Option<Arc<ClientConnection>> {
        self.clients.get(address).map(|e| e.value().clone())
    }

    /// Hubs are looked up first.
    pub fn get_any(&self, address: &Address) -> Option<Connection> {
        self.get_hub(address)
            .map(Connection::Hub)
            .or_else(|| self.get_client(address).map(Connection::Client))
    }

    /// Store a hub connection. The description's gate already admitted it,
    /// so any stale entry for the same address is replaced.
    pub fn put_hub(&self, conn: Arc<HubConnection>) {
        self.hubs.insert(conn.peer().clone(), conn);
    }

    /// Store a client connection unless one is registered under that address.
    pub fn try_put_client(&self, conn: Arc<ClientConnection>) -> bool {
        match self.clients.entry(conn.peer().clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(v) => {
                v.insert(conn);
                true
            }
        }
    }

    pub fn has_client(&self, address: &Address) -> bool {
        self.clients.contains_key(address)
    }

    pub fn remove_hub(&self, address: &Address) -> bool {
        self.hubs.remove(address).is_some()
    }

    /// Remove the hub entry only if it is still connection `id`.
    pub fn remove_hub_if_same(&self, address: &Address, id: u64) -> bool {
        self.hubs.remove_if(address, |_, c| c.id() == id).is_some()
    }

    pub fn remove_client(&self, address: &Address) -> bool {
        self.clients.remove(address).is_some()
    }

    pub fn remove_client_if_same(&self, address: &Address, id: u64) -> bool {
        self.clients.remove_if(address, |_, c| c.id() == id).is_some()
    }

    pub fn hub_count(&self) -> usize {
        self.hubs.len()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn hub_addresses(&self) -> Vec<Address> {
        let mut out: Vec<Address> = self.hubs.iter().map(|e| e.key().clone()).collect();
        out.sort();
        out
    }

    pub fn client_addresses(&self) -> Vec<Address> {
        let mut out: Vec<Address> = self.clients.iter().map(|e| e.key().clone()).collect();
        out.sort();
        out
    }

    pub fn hub_connections(&self) -> Vec<Arc<HubConnection>> {
        self.hubs.iter().map(|e| e.value().clone()).collect()
    }

    pub fn client_connections(&self) -> Vec<Arc<ClientConnection>> {
        self.clients.iter().map(|e| e.value().clone()).collect()
    }
}
