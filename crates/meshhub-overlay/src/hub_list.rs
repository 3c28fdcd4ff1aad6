//! Registry of known hubs plus the retry queue feeding the connector.
//!
//! Every description lives in `hubs`. Remote ones additionally sit in
//! exactly one of:
//!   - `must_check`: waiting for the connector (new hubs at the front,
//!     retried ones at the back)
//!   - `connected`: known reachable, watched passively through the
//!     connection
//!   - neither, while a connector has it checked out.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use meshhub_core::{Address, StateCounter};

use crate::description::HubDescription;
use crate::selector::Selector;

/// Default minimum spacing of attempts against one hub.
pub const RETRY_DELAY: Duration = Duration::from_secs(15);

pub struct HubList {
    local: Arc<HubDescription>,
    counter: Arc<StateCounter>,
    retry_delay: Duration,
    inner: Mutex<ListState>,
    wakeup: Notify,
    closed: AtomicBool,
}

struct ListState {
    hubs: HashMap<Address, Arc<HubDescription>>,
    must_check: VecDeque<Arc<HubDescription>>,
    connected: Vec<Arc<HubDescription>>,
}

impl ListState {
    fn unlink(&mut self, d: &Arc<HubDescription>) {
        self.must_check.retain(|x| !Arc::ptr_eq(x, d));
        self.connected.retain(|x| !Arc::ptr_eq(x, d));
    }
}

impl HubList {
    pub fn new(local: Arc<HubDescription>, counter: Arc<StateCounter>, retry_delay: Duration) -> Self {
        let mut hubs = HashMap::new();
        hubs.insert(local.address().clone(), local.clone());
        Self {
            local,
            counter,
            retry_delay,
            inner: Mutex::new(ListState {
                hubs,
                must_check: VecDeque::new(),
                connected: Vec::new(),
            }),
            wakeup: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ListState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn local(&self) -> &Arc<HubDescription> {
        &self.local
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Look up a hub, creating and queueing it if unseen. Freshly
    /// discovered hubs jump the queue.
    pub fn add(&self, address: &Address) -> Arc<HubDescription> {
        let created = {
            let mut st = self.lock();
            if let Some(existing) = st.hubs.get(address) {
                return existing.clone();
            }
            let d = Arc::new(HubDescription::new_remote(
                address.clone(),
                self.counter.clone(),
            ));
            st.hubs.insert(address.clone(), d.clone());
            st.must_check.push_front(d.clone());
            d
        };
        tracing::debug!(hub = %address, "hub added");
        self.wakeup.notify_waiters();
        created
    }

    pub fn get(&self, address: &Address) -> Option<Arc<HubDescription>> {
        self.lock().hubs.get(address).cloned()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.lock().hubs.contains_key(address)
    }

    /// Number of known hubs, local included.
    pub fn len(&self) -> usize {
        self.lock().hubs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Next hub the connector should look at.
    ///
    /// Waits while the queue is empty. A hub never attempted is returned at
    /// once; otherwise the head is held back until `retry_delay` has passed
    /// since its last attempt. Returns `None` once the list is closed.
    pub async fn next_hub_to_check(&self) -> Option<Arc<HubDescription>> {
        loop {
            // Registered before inspecting the queue so a concurrent
            // add/put_back cannot slip between the check and the wait.
            let notified = self.wakeup.notified();

            let wait = {
                let mut st = self.lock();
                if self.closed.load(Ordering::SeqCst) {
                    return None;
                }
                match st.must_check.front().map(|head| head.last_connect()) {
                    None => None,
                    Some(None) => return st.must_check.pop_front(),
                    Some(Some(attempted)) => {
                        let deadline = attempted + self.retry_delay;
                        let now = Instant::now();
                        if now >= deadline {
                            return st.must_check.pop_front();
                        }
                        Some(deadline - now)
                    }
                }
            };

            match wait {
                None => notified.await,
                Some(remaining) => {
                    tokio::select! {
                        _ = notified => {}
                        _ = tokio::time::sleep(remaining) => {}
                    }
                }
            }
        }
    }

    /// Return a hub after a check. Reachable hubs with a live connection
    /// stop being retried; everything else goes to the back of the queue.
    pub fn put_back(&self, d: &Arc<HubDescription>) {
        if d.is_local() {
            return;
        }
        {
            let mut st = self.lock();
            st.unlink(d);
            // Read under our lock: a teardown clears the connection before
            // calling `connection_lost`, which then finds it in `connected`.
            if d.is_reachable() && d.have_connection() {
                st.connected.push(d.clone());
            } else {
                st.must_check.push_back(d.clone());
            }
        }
        self.wakeup.notify_waiters();
    }

    /// A hub's connection went away: start retrying it again.
    pub fn connection_lost(&self, d: &Arc<HubDescription>) {
        if d.is_local() {
            return;
        }
        {
            let mut st = self.lock();
            let queued = st.must_check.iter().any(|x| Arc::ptr_eq(x, d));
            let was_connected = st.connected.iter().any(|x| Arc::ptr_eq(x, d));
            if queued || !was_connected {
                // Already queued, or checked out by a connector that will
                // put it back itself.
                return;
            }
            st.connected.retain(|x| !Arc::ptr_eq(x, d));
            st.must_check.push_back(d.clone());
        }
        tracing::debug!(hub = %d.address(), "connection lost, hub queued for retry");
        self.wakeup.notify_waiters();
    }

    /// Visit descriptions per the selector's predicates.
    pub fn select(&self, selector: &mut dyn Selector) {
        let all = selector.needs_all();
        let connected = selector.needs_connected();
        let local = selector.needs_local();

        if local && !all && !connected {
            selector.select(&self.local);
            return;
        }

        let candidates: Vec<Arc<HubDescription>> = self.lock().hubs.values().cloned().collect();
        for d in &candidates {
            if all || (connected && d.have_connection()) || (local && d.is_local()) {
                selector.select(d);
            }
        }
    }

    /// Addresses worth telling others about: ourselves, plus hubs that are
    /// connected or that we have real state for.
    pub fn known_hubs(&self) -> Vec<Address> {
        let candidates: Vec<Arc<HubDescription>> = self.lock().hubs.values().cloned().collect();
        let mut known: Vec<Address> = candidates
            .iter()
            .filter(|d| d.is_local() || d.have_connection() || d.home_state() != 0)
            .map(|d| d.address().clone())
            .collect();
        known.sort();
        known
    }

    /// Lengths of (must_check, connected), for status logging.
    pub fn queue_lengths(&self) -> (usize, usize) {
        let st = self.lock();
        (st.must_check.len(), st.connected.len())
    }

    /// Wake every waiter and make `next_hub_to_check` return `None`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.wakeup.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
