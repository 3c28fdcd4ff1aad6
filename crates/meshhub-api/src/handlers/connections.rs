//! /connections handler.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use meshhub_overlay::Origin;

use super::ApiState;

#[derive(Serialize)]
pub struct ConnectionsResponse {
    pub hubs: Vec<HubConnectionInfo>,
    pub clients: Vec<ClientConnectionInfo>,
}

#[derive(Serialize)]
pub struct HubConnectionInfo {
    pub id: u64,
    pub peer: String,
    pub origin: Origin,
    pub local_socket: Option<String>,
    pub remote_socket: Option<String>,
    pub established_secs: u64,
    pub last_sent_state: u64,
}

#[derive(Serialize)]
pub struct ClientConnectionInfo {
    pub id: u64,
    pub client: String,
    pub remote_socket: Option<String>,
    pub established_secs: u64,
}

pub async fn handle_connections(State(state): State<ApiState>) -> Json<ConnectionsResponse> {
    let mut hubs: Vec<HubConnectionInfo> = state
        .ctx
        .connections
        .hub_connections()
        .iter()
        .map(|c| HubConnectionInfo {
            id: c.id(),
            peer: c.peer().to_string(),
            origin: c.origin(),
            local_socket: c.local_socket().map(|a| a.to_string()),
            remote_socket: c.remote_socket().map(|a| a.to_string()),
            established_secs: c.established_at().elapsed().as_secs(),
            last_sent_state: c.last_sent_state(),
        })
        .collect();
    hubs.sort_by(|a, b| a.peer.cmp(&b.peer));

    let mut clients: Vec<ClientConnectionInfo> = state
        .ctx
        .connections
        .client_connections()
        .iter()
        .map(|c| ClientConnectionInfo {
            id: c.id(),
            client: c.peer().to_string(),
            remote_socket: c.remote_socket().map(|a| a.to_string()),
            established_secs: c.established_at().elapsed().as_secs(),
        })
        .collect();
    clients.sort_by(|a, b| a.client.cmp(&b.client));

    Json(ConnectionsResponse { hubs, clients })
}
