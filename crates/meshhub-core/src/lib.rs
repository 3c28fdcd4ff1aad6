//! meshhub-core: shared types, wire format and configuration.
//! All other meshhub crates depend on this one.

pub mod address;
pub mod client;
pub mod config;
pub mod message;
pub mod state;
pub mod wire;

pub use address::Address;
pub use client::ClientDescription;
pub use message::{Gossip, HubSummary, ServiceAdd, ServiceRemove};
pub use state::StateCounter;
