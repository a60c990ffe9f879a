use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

use crate::{
    backend::{BackendError, InferenceBackend},
    models::{BackendEndpoint, CompletionPayload, CompletionResponse, ModelListing},
};

const MODELS_PATH: &str = "/v1/models";
const COMPLETIONS_PATH: &str = "/v1/completions";
const ERROR_BODY_LIMIT: usize = 400;

#[derive(Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(pool_size: usize) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(pool_size)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl InferenceBackend for HttpBackend {
    fn name(&self) -> &str {
        "vllm-http"
    }

    async fn list_models(&self, endpoint: &BackendEndpoint) -> Result<ModelListing, BackendError> {
        let url = endpoint.url(MODELS_PATH);
        debug!(%endpoint, %url, "listing served models");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(map_transport_error)?;

        if response.status() != StatusCode::OK {
            return Err(status_error(response).await);
        }

        response
            .json::<ModelListing>()
            .await
            .map_err(|error| BackendError::InvalidResponse(error.to_string()))
    }

    async fn complete(
        &self,
        endpoint: &BackendEndpoint,
        payload: &CompletionPayload,
    ) -> Result<CompletionResponse, BackendError> {
        let url = endpoint.url(COMPLETIONS_PATH);
        debug!(%endpoint, %url, model = %payload.model, "sending completion request");

        let response = self
            .client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        response
            .json::<CompletionResponse>()
            .await
            .map_err(|error| BackendError::InvalidResponse(error.to_string()))
    }
}

fn map_transport_error(error: reqwest::Error) -> BackendError {
    if error.is_timeout() {
        BackendError::Timeout(error.to_string())
    } else {
        BackendError::Connection(error.to_string())
    }
}

async fn status_error(response: reqwest::Response) -> BackendError {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown backend error".to_owned());
    BackendError::Status {
        status,
        body: body.chars().take(ERROR_BODY_LIMIT).collect(),
    }
}
