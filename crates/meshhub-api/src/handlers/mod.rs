//! HTTP API handlers. Expose hub state as JSON.

pub mod connections;
pub mod hubs;
pub mod status;

use std::sync::Arc;

use meshhub_overlay::HubContext;

#[derive(Clone)]
pub struct ApiState {
    pub ctx: Arc<HubContext>,
    /// Fires a graceful daemon shutdown.
    pub shutdown_tx: tokio::sync::broadcast::Sender<()>,
}

#[cfg(test)]
pub(crate) fn test_state(address: &str) -> ApiState {
    use std::time::Duration;

    use meshhub_core::{Address, StateCounter};
    use meshhub_overlay::SocketFactory;

    let ctx = HubContext::new(
        Address::from(address),
        "test-hub",
        Arc::new(StateCounter::new()),
        Duration::from_secs(15),
        SocketFactory::new(Duration::from_secs(1)),
    );
    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    ApiState {
        ctx: Arc::new(ctx),
        shutdown_tx,
    }
}
