//! /status and /daemon/shutdown handlers.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use meshhub_overlay::LocalSelector;

use super::ApiState;

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct StatusResponse {
    pub address: String,
    pub name: String,
    pub state: u64,
    pub home_state: u64,
    pub hubs_known: usize,
    pub hub_connections: usize,
    pub client_connections: usize,
    pub local_clients: usize,
    pub must_check: usize,
    pub connected: usize,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let ctx = &state.ctx;
    let mut local = LocalSelector::default();
    ctx.hub_list.select(&mut local);
    let (name, home_state, local_clients) = local
        .info
        .map(|i| (i.name, i.home_state, i.clients.len()))
        .unwrap_or_default();
    let (must_check, connected) = ctx.hub_list.queue_lengths();

    Json(StatusResponse {
        address: ctx.local_address.to_string(),
        name,
        state: ctx.counter.get(),
        home_state,
        hubs_known: ctx.hub_list.len(),
        hub_connections: ctx.connections.hub_count(),
        client_connections: ctx.connections.client_count(),
        local_clients,
        must_check,
        connected,
    })
}

// ── /daemon/shutdown ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ShutdownResponse {
    pub shutting_down: bool,
}

pub async fn handle_shutdown(State(state): State<ApiState>) -> Json<ShutdownResponse> {
    tracing::info!("shutdown requested via API");
    let shutting_down = state.shutdown_tx.send(()).is_ok();
    Json(ShutdownResponse { shutting_down })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_state;

    #[tokio::test]
    async fn status_describes_the_local_hub() {
        let state = test_state("10.0.0.1:9000");
        state.ctx.hub_list.add(&"10.0.0.2:9000".into());

        let Json(status) = handle_status(State(state)).await;
        assert_eq!(status.address, "10.0.0.1:9000");
        assert_eq!(status.name, "test-hub");
        assert_eq!(status.hubs_known, 2);
        assert_eq!(status.must_check, 1);
        assert_eq!(status.hub_connections, 0);
        assert!(status.state >= status.home_state);
    }

    #[tokio::test]
    async fn shutdown_reaches_subscribers() {
        let state = test_state("10.0.0.1:9000");
        let mut rx = state.shutdown_tx.subscribe();
        let Json(resp) = handle_shutdown(State(state)).await;
        assert!(resp.shutting_down);
        assert!(rx.recv().await.is_ok());
    }
}
