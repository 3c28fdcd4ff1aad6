//! A client registered at a hub.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::Address;

/// One client as known by its hub, and as gossiped to every other hub.
///
/// `services` is an open-ended set of named string properties. Every
/// effective mutation bumps `version`; calls that change nothing leave it
/// alone. Identity is the address alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientDescription {
    address: Address,
    version: u64,
    services: BTreeMap<String, String>,
}

impl ClientDescription {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            version: 0,
            services: BTreeMap::new(),
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Add a service. Returns false if `tag` is already present.
    pub fn add_service(&mut self, tag: &str, info: &str) -> bool {
        if self.services.contains_key(tag) {
            return false;
        }
        self.services.insert(tag.to_string(), info.to_string());
        self.version += 1;
        true
    }

    /// Replace the info of an existing service. Returns false if absent.
    pub fn update_service(&mut self, tag: &str, info: &str) -> bool {
        match self.services.get_mut(tag) {
            Some(current) => {
                *current = info.to_string();
                self.version += 1;
                true
            }
            None => false,
        }
    }

    /// Remove a service. Returns false if absent.
    pub fn remove_service(&mut self, tag: &str) -> bool {
        if self.services.remove(tag).is_some() {
            self.version += 1;
            true
        } else {
            false
        }
    }

    pub fn service(&self, tag: &str) -> Option<&str> {
        self.services.get(tag).map(String::as_str)
    }

    pub fn has_service(&self, tag: &str) -> bool {
        self.services.contains_key(tag)
    }

    pub fn services(&self) -> &BTreeMap<String, String> {
        &self.services
    }
}

impl PartialEq for ClientDescription {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for ClientDescription {}

impl Hash for ClientDescription {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}
