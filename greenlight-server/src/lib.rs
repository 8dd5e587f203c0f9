pub mod batcher;
pub mod config;
pub mod ingress;
pub mod interactive;
pub mod status;
pub mod supervisor;
pub mod worker;

use axum::Json;
use axum::Router;
use axum::routing::{get, post};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use greenlight_core::SlackClient;

use crate::batcher::{BatchProcessor, RequestBatcher};
use crate::interactive::manager::InteractiveStateManager;
use crate::supervisor::SupervisorActions;

/// Shared application state, wired once at startup.
pub struct AppState {
    pub manager: Arc<InteractiveStateManager>,
    pub actions: Arc<SupervisorActions>,
    pub batcher: Arc<RequestBatcher>,
    /// Flush target handed to the batcher for every accepted request.
    pub publish_processor: Arc<dyn BatchProcessor>,
    /// Used directly for reviewer notifications after a decision lands.
    pub slack: SlackClient,
    pub current_signing_key: String,
    pub next_signing_key: Option<String>,
    pub status_auth_token: Option<String>,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status::get_status))
        .route("/approvals", post(ingress::enqueue_approval))
        .merge(worker::worker_router(state.clone()))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": get_service_version(),
    }))
}

/// Short git hash when the build pipeline provides one, crate version
/// otherwise.
pub fn get_service_version() -> String {
    match option_env!("GREENLIGHT_GIT_HASH") {
        Some(hash) if hash.len() >= 8 => hash[..8].to_string(),
        Some(hash) => hash.to_string(),
        None => env!("CARGO_PKG_VERSION").to_string(),
    }
}
