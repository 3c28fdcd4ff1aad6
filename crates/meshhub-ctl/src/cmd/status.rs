//! Daemon status and shutdown commands.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json, post_json};

#[derive(Deserialize)]
struct StatusResponse {
    address: String,
    name: String,
    state: u64,
    home_state: u64,
    hubs_known: usize,
    hub_connections: usize,
    client_connections: usize,
    local_clients: usize,
    must_check: usize,
    connected: usize,
}

#[derive(Deserialize)]
struct ShutdownResponse {
    shutting_down: bool,
}

pub async fn cmd_status(port: u16) -> Result<()> {
    let resp: StatusResponse = get_json(&format!("{}/status", base_url(port))).await?;

    println!("═══════════════════════════════════════");
    println!("  meshhub Status");
    println!("═══════════════════════════════════════");
    println!("  Address          : {}", resp.address);
    if !resp.name.is_empty() {
        println!("  Name             : {}", resp.name);
    }
    println!("  State            : {} (home {})", resp.state, resp.home_state);
    println!("  Hubs known       : {}", resp.hubs_known);
    println!("  Hub connections  : {}", resp.hub_connections);
    println!("  Client links     : {}", resp.client_connections);
    println!("  Local clients    : {}", resp.local_clients);
    println!("  Awaiting check   : {}", resp.must_check);
    println!("  Reachable, idle  : {}", resp.connected);

    Ok(())
}

pub async fn cmd_shutdown(port: u16) -> Result<()> {
    let resp: ShutdownResponse = post_json(&format!("{}/daemon/shutdown", base_url(port))).await?;
    if resp.shutting_down {
        println!("meshhubd is shutting down.");
    } else {
        println!("meshhubd did not acknowledge the shutdown request.");
    }
    Ok(())
}
