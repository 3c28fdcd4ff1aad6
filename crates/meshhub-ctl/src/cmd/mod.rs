//! CLI command modules.

pub mod hubs;
pub mod http;
pub mod status;
