use std::sync::Arc;

use crate::{
    backend::InferenceBackend, config::RelayConfig, harness::PromptPool, relay::CompletionRelay,
};

#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<CompletionRelay>,
    pub prompts: Arc<PromptPool>,
}

impl AppState {
    pub fn new<B>(config: &RelayConfig, backend: Arc<B>) -> Self
    where
        B: InferenceBackend + 'static,
    {
        let backend: Arc<dyn InferenceBackend> = backend;
        Self {
            relay: Arc::new(CompletionRelay::new(config, backend)),
            prompts: Arc::new(PromptPool::default()),
        }
    }
}
