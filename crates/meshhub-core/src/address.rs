//! Hub and client addresses.
//!
//! An address is an opaque, ordered string. For hubs it is the `host:port`
//! other hubs dial. Ordering is plain byte-wise string ordering and must stay
//! that way: both ends of a simultaneous connect use it to agree on who is
//! master, so any normalisation would break the tie-break.

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if `self` wins the master role against `other` in a
    /// simultaneous connect.
    pub fn is_master_over(&self, other: &Address) -> bool {
        self.0 < other.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Self(addr.to_string())
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smaller_address_is_master() {
        let h1 = Address::from("10.0.0.1:9000");
        let h2 = Address::from("10.0.0.2:9000");
        assert!(h1.is_master_over(&h2));
        assert!(!h2.is_master_over(&h1));
        assert!(!h1.is_master_over(&h1));
    }

    #[test]
    fn ordering_is_plain_string_ordering() {
        // "10.0.0.10" sorts before "10.0.0.9" as a string; keep it that way.
        let a = Address::from("10.0.0.10:9000");
        let b = Address::from("10.0.0.9:9000");
        assert!(a.is_master_over(&b));
    }

    #[test]
    fn serializes_as_plain_string() {
        let a = Address::from("127.0.0.1:17878");
        assert_eq!(serde_json::to_string(&a).unwrap(), "\"127.0.0.1:17878\"");
    }
}
