use std::time::Duration;

use meshhub_core::wire::{Opcode, WireError};
use meshhub_core::Address;

/// Errors raised while setting up or running hub connections.
///
/// Per-connection errors never leave the task that hit them; they are
/// turned into reachability changes and log lines. Only `Hub::start`
/// hands one back to the caller.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected opcode {0:?} during handshake")]
    UnexpectedOpcode(Opcode),

    #[error("connection refused by {0}")]
    Refused(Address),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("invalid bind address: {0}")]
    InvalidBindAddress(String),
}
