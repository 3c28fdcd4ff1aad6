//! Frame payloads exchanged on established connections.
//!
//! Hub connections carry `Gossip`; client connections carry `ServiceAdd`
//! and `ServiceRemove`. `Disconnect` has no payload.

use serde::{Deserialize, Serialize};

use crate::{Address, ClientDescription};

/// A periodic push of the sender's view.
///
/// Wire: opcode = GOSSIP
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gossip {
    /// Address of the hub that sent this gossip.
    pub sender: Address,

    /// Sender's state counter at the time the gossip was built.
    pub state: u64,

    /// Descriptions that changed since the previous gossip on this
    /// connection. The sender's own entry is among them whenever it changed.
    pub hubs: Vec<HubSummary>,
}

impl Gossip {
    /// The sender's own entry, if it is part of this round.
    pub fn sender_summary(&self) -> Option<&HubSummary> {
        self.hubs.iter().find(|h| h.address == self.sender)
    }
}

/// What one hub tells another about a hub it knows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSummary {
    pub address: Address,

    /// Human-readable name. Empty if the reporter never learned it.
    pub name: String,

    /// The described hub's own state counter, as last seen by the reporter.
    pub home_state: u64,

    /// Reporter's hop distance to the described hub. 0 means directly
    /// connected (or the reporter itself).
    pub hops: u32,

    pub clients: Vec<ClientDescription>,

    /// Hubs the described hub reports being connected to.
    pub connected_to: Vec<String>,
}

/// Register (or re-register) a named service property for a client.
///
/// Wire: opcode = SERVICE_ADD
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceAdd {
    pub tag: String,
    pub info: String,
}

/// Wire: opcode = SERVICE_REMOVE
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRemove {
    pub tag: String,
}
