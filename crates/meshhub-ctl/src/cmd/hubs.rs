//! Hub, client and connection listings.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json};

// ── Response types ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct HubsResponse {
    hubs: Vec<HubInfo>,
}

#[derive(Deserialize)]
struct HubInfo {
    address: String,
    name: String,
    local: bool,
    reachable: String,
    can_reach_me: String,
    hops: u32,
    indirection: Option<String>,
    connected: bool,
    home_state: u64,
    last_local_update: u64,
    last_contact_secs: Option<u64>,
    clients: Vec<ClientEntry>,
    connected_to: Vec<String>,
}

#[derive(Deserialize)]
struct ClientEntry {
    address: String,
    version: u64,
    services: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct ClientsResponse {
    clients: Vec<ClientInfo>,
}

#[derive(Deserialize)]
struct ClientInfo {
    address: String,
    hub: String,
    version: u64,
    services: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct ConnectionsResponse {
    hubs: Vec<HubConnectionInfo>,
    clients: Vec<ClientConnectionInfo>,
}

#[derive(Deserialize)]
#[allow(dead_code)]
struct HubConnectionInfo {
    id: u64,
    peer: String,
    origin: String,
    local_socket: Option<String>,
    remote_socket: Option<String>,
    established_secs: u64,
    last_sent_state: u64,
}

#[derive(Deserialize)]
struct ClientConnectionInfo {
    id: u64,
    client: String,
    remote_socket: Option<String>,
    established_secs: u64,
}

/// Hop counts at or above this are "no route".
const NO_ROUTE: u32 = u32::MAX / 2;

fn hops_label(hops: u32) -> String {
    if hops >= NO_ROUTE {
        "-".to_string()
    } else {
        hops.to_string()
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

pub async fn cmd_hubs(port: u16) -> Result<()> {
    let resp: HubsResponse = get_json(&format!("{}/hubs", base_url(port))).await?;

    println!("═══════════════════════════════════════");
    println!("  Known Hubs ({})", resp.hubs.len());
    println!("═══════════════════════════════════════");

    for h in &resp.hubs {
        let marker = if h.local { " (local)" } else { "" };
        let link = if h.connected { "connected" } else { "-" };
        println!(
            "  {:<24} {:<11} reach={:<11} back={:<11} hops={:<3} clients={}{}",
            h.address,
            link,
            h.reachable,
            h.can_reach_me,
            hops_label(h.hops),
            h.clients.len(),
            marker
        );
    }

    Ok(())
}

pub async fn cmd_hub(port: u16, address: &str) -> Result<()> {
    let h: HubInfo = get_json(&format!("{}/hubs/{}", base_url(port), address)).await?;

    println!("═══════════════════════════════════════");
    println!("  Hub {}", h.address);
    println!("═══════════════════════════════════════");
    if !h.name.is_empty() {
        println!("  Name           : {}", h.name);
    }
    println!("  Local          : {}", h.local);
    println!("  Reachable      : {}", h.reachable);
    println!("  Can reach us   : {}", h.can_reach_me);
    println!("  Connected      : {}", h.connected);
    println!("  Hops           : {}", hops_label(h.hops));
    if let Some(via) = &h.indirection {
        println!("  Via            : {}", via);
    }
    println!("  Home state     : {}", h.home_state);
    println!("  Local update   : {}", h.last_local_update);
    match h.last_contact_secs {
        Some(s) => println!("  Last contact   : {}s ago", s),
        None => println!("  Last contact   : never"),
    }

    if !h.connected_to.is_empty() {
        println!("\n  Connected to:");
        for peer in &h.connected_to {
            println!("    {}", peer);
        }
    }

    if h.clients.is_empty() {
        println!("\n  No clients.");
    } else {
        println!("\n  Clients:");
        for c in &h.clients {
            println!("  ┌─ {} (v{})", c.address, c.version);
            for (tag, info) in &c.services {
                println!("  │  {} = {}", tag, info);
            }
            println!("  └─");
        }
    }

    Ok(())
}

pub async fn cmd_clients(port: u16) -> Result<()> {
    let resp: ClientsResponse = get_json(&format!("{}/clients", base_url(port))).await?;

    if resp.clients.is_empty() {
        println!("No clients known.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Clients ({})", resp.clients.len());
    println!("═══════════════════════════════════════");

    for c in &resp.clients {
        println!("  ┌─ {}", c.address);
        println!("  │  hub      : {}", c.hub);
        println!("  │  version  : {}", c.version);
        if c.services.is_empty() {
            println!("  └─ services : none");
        } else {
            let tags: Vec<&str> = c.services.keys().map(String::as_str).collect();
            println!("  └─ services : {}", tags.join(", "));
        }
    }

    Ok(())
}

pub async fn cmd_connections(port: u16) -> Result<()> {
    let resp: ConnectionsResponse = get_json(&format!("{}/connections", base_url(port))).await?;

    println!("═══════════════════════════════════════");
    println!(
        "  Connections ({} hubs, {} clients)",
        resp.hubs.len(),
        resp.clients.len()
    );
    println!("═══════════════════════════════════════");

    for c in &resp.hubs {
        println!("  ┌─ hub {} [#{}]", c.peer, c.id);
        println!("  │  origin   : {}", c.origin);
        println!("  │  socket   : {}", c.remote_socket.as_deref().unwrap_or("?"));
        println!("  │  gossiped : state {}", c.last_sent_state);
        println!("  └─ uptime   : {}s", c.established_secs);
    }
    for c in &resp.clients {
        println!("  ┌─ client {} [#{}]", c.client, c.id);
        println!("  │  socket   : {}", c.remote_socket.as_deref().unwrap_or("?"));
        println!("  └─ uptime   : {}s", c.established_secs);
    }

    Ok(())
}
