pub mod backend;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod harness;
pub mod models;
pub mod registry;
pub mod relay;
pub mod state;
pub mod verifier;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use backend::http::HttpBackend;
use config::RelayConfig;
use errors::ConfigError;
use tracing::info;

pub fn build_state(config: &RelayConfig) -> Result<state::AppState, ConfigError> {
    let backend = Arc::new(HttpBackend::new(config.max_inflight)?);
    let state = state::AppState::new(config, backend);

    for (model, endpoint) in config.registry.entries() {
        info!(model, %endpoint, "backend registered");
    }
    info!(
        backend = state.relay.backend_name(),
        verify_timeout_secs = config.verify_timeout.as_secs(),
        generate_timeout_secs = config.generate_timeout.as_secs(),
        verify_cache_ttl_ms = config.verify_cache_ttl.as_millis() as u64,
        max_inflight = config.max_inflight,
        "relay configured"
    );
    Ok(state)
}

pub fn build_app(state: state::AppState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/v1/models", get(handlers::list_models))
        .route("/v1/generate", post(handlers::generate))
        .route("/v1/load-test", post(handlers::load_test))
        .with_state(state)
}
