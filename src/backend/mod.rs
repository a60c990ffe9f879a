pub mod http;
pub mod mock;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{BackendEndpoint, CompletionPayload, CompletionResponse, ModelListing};

// Implementations do not enforce timeouts. The verifier and relay bound every call.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    fn name(&self) -> &str;
    async fn list_models(&self, endpoint: &BackendEndpoint) -> Result<ModelListing, BackendError>;
    async fn complete(
        &self,
        endpoint: &BackendEndpoint,
        payload: &CompletionPayload,
    ) -> Result<CompletionResponse, BackendError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("backend timeout: {0}")]
    Timeout(String),
    #[error("status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("backend invalid response: {0}")]
    InvalidResponse(String),
}
