use std::{sync::Arc, time::Instant};

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    errors::AppError,
    harness::{self, AggregateStats, HarnessConfig, PromptSource},
    models::{GenerationRequest, MAX_MAX_TOKENS, MIN_MAX_TOKENS},
    state::AppState,
};

pub const MAX_LOAD_TEST_CONCURRENCY: usize = 64;
pub const MAX_LOAD_TEST_REQUESTS_PER_CALLER: usize = 20;

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelEntry>,
}

#[derive(Debug, Serialize)]
pub struct ModelEntry {
    pub id: String,
    pub endpoint: String,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub model: String,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct LoadTestRequest {
    pub model: String,
    pub concurrency: usize,
    pub requests_per_caller: usize,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

pub async fn healthz() -> &'static str {
    "ok"
}

pub async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    let models = state
        .relay
        .registry()
        .entries()
        .map(|(id, endpoint)| ModelEntry {
            id: id.to_owned(),
            endpoint: endpoint.to_string(),
        })
        .collect();
    Json(ModelsResponse { models })
}

pub async fn generate(
    State(state): State<AppState>,
    Json(request): Json<GenerationRequest>,
) -> Result<Json<GenerateResponse>, AppError> {
    let started = Instant::now();
    let model = request.model.clone();
    info!(model = %model, max_tokens = request.max_tokens, "generation request accepted");

    let text = state.relay.try_generate(request).await?;

    info!(
        model = %model,
        latency_ms = started.elapsed().as_millis() as u64,
        "generation request served"
    );
    Ok(Json(GenerateResponse { model, text }))
}

pub async fn load_test(
    State(state): State<AppState>,
    Json(request): Json<LoadTestRequest>,
) -> Result<Json<AggregateStats>, AppError> {
    if !(1..=MAX_LOAD_TEST_CONCURRENCY).contains(&request.concurrency) {
        return Err(AppError::BadRequest(format!(
            "concurrency must be between 1 and {MAX_LOAD_TEST_CONCURRENCY}"
        )));
    }
    if !(1..=MAX_LOAD_TEST_REQUESTS_PER_CALLER).contains(&request.requests_per_caller) {
        return Err(AppError::BadRequest(format!(
            "requests_per_caller must be between 1 and {MAX_LOAD_TEST_REQUESTS_PER_CALLER}"
        )));
    }
    if let Some(max_tokens) = request.max_tokens {
        if !(MIN_MAX_TOKENS..=MAX_MAX_TOKENS).contains(&max_tokens) {
            return Err(AppError::BadRequest(format!(
                "max_tokens must be between {MIN_MAX_TOKENS} and {MAX_MAX_TOKENS}, got {max_tokens}"
            )));
        }
    }
    state.relay.registry().lookup(&request.model)?;

    let mut config = HarnessConfig::new(
        request.model,
        request.concurrency,
        request.requests_per_caller,
    );
    if let Some(max_tokens) = request.max_tokens {
        config.max_tokens = max_tokens;
    }

    let prompts: Arc<dyn PromptSource> = state.prompts.clone();
    let stats = harness::run(state.relay.clone(), &config, prompts).await;
    stats.log_summary();
    Ok(Json(stats))
}
