use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::sleep;

use crate::{
    backend::{BackendError, InferenceBackend},
    models::{
        BackendEndpoint, CompletionChoice, CompletionPayload, CompletionResponse,
        CompletionUsage, ModelListing,
    },
};

#[derive(Debug, Default)]
pub struct MockBackend {
    endpoints: DashMap<BackendEndpoint, MockEndpoint>,
    list_calls: AtomicUsize,
    complete_calls: AtomicUsize,
    last_payload: Mutex<Option<CompletionPayload>>,
}

#[derive(Debug, Clone)]
struct MockEndpoint {
    served_model: Option<String>,
    completion: MockCompletion,
    listing_delay: Duration,
    completion_delay: Duration,
}

#[derive(Debug, Clone)]
pub enum MockCompletion {
    Echo,
    Text(String),
    Status(u16, String),
    NoChoices,
    ConnectionDropped,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoint(self, endpoint: BackendEndpoint, model: impl Into<String>) -> Self {
        self.endpoints.insert(
            endpoint,
            MockEndpoint {
                served_model: Some(model.into()),
                completion: MockCompletion::Echo,
                listing_delay: Duration::ZERO,
                completion_delay: Duration::ZERO,
            },
        );
        self
    }

    pub fn serve(&self, endpoint: &BackendEndpoint, model: impl Into<String>) {
        if let Some(mut entry) = self.endpoints.get_mut(endpoint) {
            entry.served_model = Some(model.into());
        }
    }

    pub fn serve_nothing(&self, endpoint: &BackendEndpoint) {
        if let Some(mut entry) = self.endpoints.get_mut(endpoint) {
            entry.served_model = None;
        }
    }

    pub fn take_down(&self, endpoint: &BackendEndpoint) {
        self.endpoints.remove(endpoint);
    }

    pub fn set_completion(&self, endpoint: &BackendEndpoint, completion: MockCompletion) {
        if let Some(mut entry) = self.endpoints.get_mut(endpoint) {
            entry.completion = completion;
        }
    }

    pub fn set_listing_delay(&self, endpoint: &BackendEndpoint, delay: Duration) {
        if let Some(mut entry) = self.endpoints.get_mut(endpoint) {
            entry.listing_delay = delay;
        }
    }

    pub fn set_completion_delay(&self, endpoint: &BackendEndpoint, delay: Duration) {
        if let Some(mut entry) = self.endpoints.get_mut(endpoint) {
            entry.completion_delay = delay;
        }
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn complete_calls(&self) -> usize {
        self.complete_calls.load(Ordering::SeqCst)
    }

    pub fn network_calls(&self) -> usize {
        self.list_calls() + self.complete_calls()
    }

    pub fn last_payload(&self) -> Option<CompletionPayload> {
        self.last_payload
            .lock()
            .map(|payload| payload.clone())
            .unwrap_or_default()
    }

    fn record_payload(&self, payload: &CompletionPayload) {
        if let Ok(mut last) = self.last_payload.lock() {
            *last = Some(payload.clone());
        }
    }

    fn snapshot(&self, endpoint: &BackendEndpoint) -> Result<MockEndpoint, BackendError> {
        self.endpoints
            .get(endpoint)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| BackendError::Connection(format!("{endpoint}: connection refused")))
    }
}

#[async_trait]
impl InferenceBackend for MockBackend {
    fn name(&self) -> &str {
        "mock-backend"
    }

    async fn list_models(&self, endpoint: &BackendEndpoint) -> Result<ModelListing, BackendError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let entry = self.snapshot(endpoint)?;
        if !entry.listing_delay.is_zero() {
            sleep(entry.listing_delay).await;
        }

        Ok(match entry.served_model {
            Some(model) => ModelListing::single(model),
            None => ModelListing { data: Vec::new() },
        })
    }

    async fn complete(
        &self,
        endpoint: &BackendEndpoint,
        payload: &CompletionPayload,
    ) -> Result<CompletionResponse, BackendError> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        self.record_payload(payload);
        let entry = self.snapshot(endpoint)?;
        if !entry.completion_delay.is_zero() {
            sleep(entry.completion_delay).await;
        }

        match entry.completion {
            MockCompletion::Echo => Ok(text_response(format!(
                " Mock completion for model {}: {}",
                payload.model, payload.prompt
            ))),
            MockCompletion::Text(text) => Ok(text_response(text)),
            MockCompletion::Status(status, body) => Err(BackendError::Status { status, body }),
            MockCompletion::NoChoices => Ok(CompletionResponse {
                choices: Vec::new(),
                usage: None,
            }),
            MockCompletion::ConnectionDropped => Err(BackendError::Connection(format!(
                "{endpoint}: connection reset by peer"
            ))),
        }
    }
}

fn text_response(text: String) -> CompletionResponse {
    let completion_tokens = text.split_whitespace().count() as u32;
    CompletionResponse {
        choices: vec![CompletionChoice {
            text: Some(text),
            finish_reason: Some("stop".to_owned()),
        }],
        usage: Some(CompletionUsage {
            prompt_tokens: 0,
            completion_tokens,
        }),
    }
}
