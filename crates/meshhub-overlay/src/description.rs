//! One hub as known by the local process.
//!
//! Every other hub's view of a hub is a `HubDescription`. The description
//! of the current process is the only `local` one; its clients and
//! connected-to list are edited in place. Remote descriptions are replaced
//! wholesale through `update` when gossip about them arrives.
//!
//! All mutable fields sit behind the description's own mutex, so two tasks
//! only contend when they touch the same hub. The lock is never held across
//! an `.await`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use meshhub_core::{Address, ClientDescription, HubSummary, StateCounter};

use crate::connection::HubConnection;

/// Hop count of a hub nobody has offered a route to.
pub const INFINITE_HOPS: u32 = u32::MAX / 2;

/// Evidence about whether a connection is possible.
///
/// Ordered: a peer only ever reports the best evidence it has.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Reachability {
    #[default]
    Unknown,
    Unreachable,
    Reachable,
}

pub struct HubDescription {
    address: Address,
    local: bool,
    counter: Arc<StateCounter>,
    inner: Mutex<DescriptionState>,
}

struct DescriptionState {
    name: String,
    reachable: Reachability,
    can_reach_me: Reachability,
    hops: u32,
    /// Hub that told us about this one. Looked up by address, never owned.
    indirection: Option<Address>,
    last_contact: Option<Instant>,
    last_connect: Option<Instant>,
    last_local_update: u64,
    home_state: u64,
    clients: HashMap<Address, ClientDescription>,
    connected_to: Vec<String>,
    connection: Option<Arc<HubConnection>>,
}

impl HubDescription {
    /// The description of the current process.
    pub fn new_local(address: Address, name: &str, counter: Arc<StateCounter>) -> Self {
        let state = counter.increment();
        Self {
            address,
            local: true,
            counter,
            inner: Mutex::new(DescriptionState {
                name: name.to_string(),
                reachable: Reachability::Reachable,
                can_reach_me: Reachability::Reachable,
                hops: 0,
                indirection: None,
                last_contact: None,
                last_connect: None,
                last_local_update: state,
                home_state: state,
                clients: HashMap::new(),
                connected_to: Vec::new(),
                connection: None,
            }),
        }
    }

    /// A hub we have only heard of. Nothing is known about it yet.
    pub fn new_remote(address: Address, counter: Arc<StateCounter>) -> Self {
        Self {
            address,
            local: false,
            counter,
            inner: Mutex::new(DescriptionState {
                name: String::new(),
                reachable: Reachability::Unknown,
                can_reach_me: Reachability::Unknown,
                hops: INFINITE_HOPS,
                indirection: None,
                last_contact: None,
                last_connect: None,
                last_local_update: 0,
                home_state: 0,
                clients: HashMap::new(),
                connected_to: Vec::new(),
                connection: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DescriptionState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a local change. Local descriptions also advance their home
    /// state, since that is what peers compare against.
    fn touch(&self, st: &mut DescriptionState) {
        let state = self.counter.increment();
        st.last_local_update = state;
        if self.local {
            st.home_state = state;
        }
    }

    fn assert_local(&self, op: &str) {
        assert!(
            self.local,
            "{op} called on remote hub description {}",
            self.address
        );
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn is_local(&self) -> bool {
        self.local
    }

    pub fn name(&self) -> String {
        self.lock().name.clone()
    }

    pub fn reachable(&self) -> Reachability {
        self.lock().reachable
    }

    pub fn is_reachable(&self) -> bool {
        self.lock().reachable == Reachability::Reachable
    }

    pub fn can_reach_me(&self) -> Reachability {
        self.lock().can_reach_me
    }

    pub fn hops(&self) -> u32 {
        self.lock().hops
    }

    pub fn indirection(&self) -> Option<Address> {
        self.lock().indirection.clone()
    }

    pub fn last_contact(&self) -> Option<Instant> {
        self.lock().last_contact
    }

    pub fn last_connect(&self) -> Option<Instant> {
        self.lock().last_connect
    }

    pub fn last_local_update(&self) -> u64 {
        self.lock().last_local_update
    }

    pub fn home_state(&self) -> u64 {
        self.lock().home_state
    }

    pub fn clients(&self) -> Vec<ClientDescription> {
        self.lock().clients.values().cloned().collect()
    }

    pub fn client(&self, address: &Address) -> Option<ClientDescription> {
        self.lock().clients.get(address).cloned()
    }

    pub fn has_client(&self, address: &Address) -> bool {
        self.lock().clients.contains_key(address)
    }

    pub fn connected_to(&self) -> Vec<String> {
        self.lock().connected_to.clone()
    }

    // ── Reachability ─────────────────────────────────────────────────────────

    /// We opened a connection to this hub ourselves.
    pub fn set_reachable(&self) {
        let mut st = self.lock();
        let changed = st.reachable != Reachability::Reachable || st.hops != 0;
        st.reachable = Reachability::Reachable;
        st.indirection = None;
        st.hops = 0;
        if changed {
            self.touch(&mut st);
        }
    }

    pub fn set_unreachable(&self) {
        let mut st = self.lock();
        if st.reachable != Reachability::Unreachable {
            st.reachable = Reachability::Unreachable;
            self.touch(&mut st);
        }
    }

    /// The hub opened a connection to us.
    pub fn set_can_reach_me(&self) {
        self.lock().can_reach_me = Reachability::Reachable;
    }

    /// Offer a route to this hub via `via`. Applied only while we cannot
    /// reach the hub directly and the route is strictly shorter.
    pub fn add_indirection(&self, via: &Address, hops: u32) -> bool {
        let mut st = self.lock();
        if st.reachable == Reachability::Reachable || hops >= st.hops {
            return false;
        }
        st.indirection = Some(via.clone());
        st.hops = hops;
        self.touch(&mut st);
        true
    }

    pub fn mark_contact(&self) {
        self.lock().last_contact = Some(Instant::now());
    }

    pub fn mark_connect_attempt(&self) {
        self.lock().last_connect = Some(Instant::now());
    }

    // ── Connection gate ──────────────────────────────────────────────────────

    /// Install `conn` as this hub's connection, unless one is already
    /// present. Both the acceptor and the connector go through here, which
    /// is what keeps a peer to at most one live connection.
    pub fn create_connection(&self, conn: Arc<HubConnection>) -> bool {
        let mut st = self.lock();
        if st.connection.is_some() {
            return false;
        }
        st.connection = Some(conn);
        self.touch(&mut st);
        true
    }

    /// Clear the connection if it is still `conn`. A newer connection that
    /// replaced it is left alone.
    pub fn remove_connection(&self, conn: &HubConnection) -> bool {
        let mut st = self.lock();
        match &st.connection {
            Some(current) if current.id() == conn.id() => {
                st.connection = None;
                self.touch(&mut st);
                true
            }
            _ => false,
        }
    }

    pub fn have_connection(&self) -> bool {
        self.lock().connection.is_some()
    }

    pub fn connection(&self) -> Option<Arc<HubConnection>> {
        self.lock().connection.clone()
    }

    // ── Remote updates ───────────────────────────────────────────────────────

    /// Replace what we know about a remote hub with what it (or someone
    /// relaying for it) reported. The name only fills in if we had none.
    pub fn update(
        &self,
        name: &str,
        home_state: u64,
        clients: Vec<ClientDescription>,
        connected_to: Vec<String>,
    ) {
        let mut st = self.lock();
        if st.name.is_empty() {
            st.name = name.to_string();
        }
        st.home_state = home_state;
        st.clients = clients
            .into_iter()
            .map(|c| (c.address().clone(), c))
            .collect();
        st.connected_to = connected_to;
        self.touch(&mut st);
    }

    // ── Local-only mutations ─────────────────────────────────────────────────

    /// Register a client. Returns false if one with that address exists.
    pub fn add_client(&self, client: ClientDescription) -> bool {
        self.assert_local("add_client");
        let mut st = self.lock();
        if st.clients.contains_key(client.address()) {
            return false;
        }
        st.clients.insert(client.address().clone(), client);
        self.touch(&mut st);
        true
    }

    pub fn remove_client(&self, address: &Address) -> bool {
        self.assert_local("remove_client");
        let mut st = self.lock();
        if st.clients.remove(address).is_none() {
            return false;
        }
        self.touch(&mut st);
        true
    }

    /// Add or update a service property of a registered client.
    pub fn client_service_added(&self, client: &Address, tag: &str, info: &str) -> bool {
        self.assert_local("client_service_added");
        let mut st = self.lock();
        let changed = match st.clients.get_mut(client) {
            Some(c) if c.has_service(tag) => c.update_service(tag, info),
            Some(c) => c.add_service(tag, info),
            None => false,
        };
        if changed {
            self.touch(&mut st);
        }
        changed
    }

    pub fn client_service_removed(&self, client: &Address, tag: &str) -> bool {
        self.assert_local("client_service_removed");
        let mut st = self.lock();
        let changed = st
            .clients
            .get_mut(client)
            .map(|c| c.remove_service(tag))
            .unwrap_or(false);
        if changed {
            self.touch(&mut st);
        }
        changed
    }

    pub fn add_connected_to(&self, address: &str) {
        self.assert_local("add_connected_to");
        let mut st = self.lock();
        if st.connected_to.iter().any(|a| a == address) {
            return;
        }
        st.connected_to.push(address.to_string());
        self.touch(&mut st);
    }

    pub fn remove_connected_to(&self, address: &str) {
        self.assert_local("remove_connected_to");
        let mut st = self.lock();
        let before = st.connected_to.len();
        st.connected_to.retain(|a| a != address);
        if st.connected_to.len() != before {
            self.touch(&mut st);
        }
    }

    // ── Views ────────────────────────────────────────────────────────────────

    /// Gossip entry for this hub.
    pub fn summary(&self) -> HubSummary {
        let st = self.lock();
        let hops = if self.local || st.connection.is_some() {
            0
        } else {
            st.hops
        };
        HubSummary {
            address: self.address.clone(),
            name: st.name.clone(),
            home_state: st.home_state,
            hops,
            clients: st.clients.values().cloned().collect(),
            connected_to: st.connected_to.clone(),
        }
    }

    /// Point-in-time view for status output.
    pub fn snapshot(&self) -> HubInfo {
        let st = self.lock();
        let mut clients: Vec<ClientDescription> = st.clients.values().cloned().collect();
        clients.sort_by(|a, b| a.address().cmp(b.address()));
        HubInfo {
            address: self.address.to_string(),
            name: st.name.clone(),
            local: self.local,
            reachable: st.reachable,
            can_reach_me: st.can_reach_me,
            hops: st.hops,
            indirection: st.indirection.as_ref().map(Address::to_string),
            connected: st.connection.is_some(),
            home_state: st.home_state,
            last_local_update: st.last_local_update,
            last_contact_secs: st.last_contact.map(|t| t.elapsed().as_secs()),
            clients,
            connected_to: st.connected_to.clone(),
        }
    }
}

impl std::fmt::Debug for HubDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.lock();
        f.debug_struct("HubDescription")
            .field("address", &self.address)
            .field("local", &self.local)
            .field("reachable", &st.reachable)
            .field("can_reach_me", &st.can_reach_me)
            .field("hops", &st.hops)
            .field("connected", &st.connection.is_some())
            .finish()
    }
}

/// Serializable snapshot of a `HubDescription`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubInfo {
    pub address: String,
    pub name: String,
    pub local: bool,
    pub reachable: Reachability,
    pub can_reach_me: Reachability,
    pub hops: u32,
    pub indirection: Option<String>,
    pub connected: bool,
    pub home_state: u64,
    pub last_local_update: u64,
    pub last_contact_secs: Option<u64>,
    pub clients: Vec<ClientDescription>,
    pub connected_to: Vec<String>,
}
