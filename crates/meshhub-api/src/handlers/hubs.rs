//! /hubs, /hubs/{address} and /clients handlers.

use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use meshhub_core::Address;
use meshhub_overlay::{ClientListSelector, HubDetailsSelector, HubInfo, HubInfoSelector};

use super::ApiState;

// ── /hubs ────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HubsResponse {
    pub hubs: Vec<HubInfo>,
}

pub async fn handle_hubs(State(state): State<ApiState>) -> Json<HubsResponse> {
    let mut selector = HubInfoSelector::default();
    state.ctx.hub_list.select(&mut selector);
    Json(HubsResponse {
        hubs: selector.hubs,
    })
}

// ── /hubs/{address} ──────────────────────────────────────────────────────────

pub async fn handle_hub_detail(
    State(state): State<ApiState>,
    Path(address): Path<String>,
) -> Result<Json<HubInfo>, (StatusCode, String)> {
    let mut selector = HubDetailsSelector::new(Address::new(address));
    state.ctx.hub_list.select(&mut selector);
    selector
        .result
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, "hub not found".to_string()))
}

// ── /clients ─────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ClientsResponse {
    pub clients: Vec<ClientInfo>,
}

#[derive(Serialize)]
pub struct ClientInfo {
    pub address: String,
    pub hub: String,
    pub version: u64,
    pub services: BTreeMap<String, String>,
}

pub async fn handle_clients(State(state): State<ApiState>) -> Json<ClientsResponse> {
    let mut selector = ClientListSelector::default();
    state.ctx.hub_list.select(&mut selector);

    let mut clients: Vec<ClientInfo> = selector
        .clients
        .into_iter()
        .map(|(hub, client)| ClientInfo {
            address: client.address().to_string(),
            hub: hub.to_string(),
            version: client.version(),
            services: client.services().clone(),
        })
        .collect();
    clients.sort_by(|a, b| a.address.cmp(&b.address).then(a.hub.cmp(&b.hub)));

    Json(ClientsResponse { clients })
}
