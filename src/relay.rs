use std::{sync::Arc, time::Duration};

use tokio::{
    sync::Semaphore,
    time::{timeout, Instant},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    backend::{BackendError, InferenceBackend},
    config::RelayConfig,
    errors::{ErrorKind, NetworkFailure, RelayFailure},
    models::{BackendEndpoint, GenerationRequest, GenerationResult},
    registry::BackendRegistry,
    verifier::{ModelVerifier, Verdict},
};

pub struct CompletionRelay {
    registry: BackendRegistry,
    verifier: ModelVerifier,
    backend: Arc<dyn InferenceBackend>,
    inflight: Semaphore,
    generate_timeout: Duration,
    mount_prefix: String,
}

impl CompletionRelay {
    pub fn new(config: &RelayConfig, backend: Arc<dyn InferenceBackend>) -> Self {
        let verifier = ModelVerifier::new(
            backend.clone(),
            config.verify_timeout,
            config.verify_cache_ttl,
        );
        Self {
            registry: config.registry.clone(),
            verifier,
            backend,
            inflight: Semaphore::new(config.max_inflight.max(1)),
            generate_timeout: config.generate_timeout,
            mount_prefix: config.mount_prefix.clone(),
        }
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn verifier(&self) -> &ModelVerifier {
        &self.verifier
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub async fn generate(&self, request: GenerationRequest) -> GenerationResult {
        self.try_generate(request).await.into()
    }

    pub async fn try_generate(&self, request: GenerationRequest) -> Result<String, RelayFailure> {
        let request_id = Uuid::new_v4();
        let model = request.model.clone();

        let result = self.relay(request_id, request).await;
        if let Err(failure) = &result {
            warn!(
                %request_id,
                model = %model,
                kind = failure.kind.label(),
                error = %failure.message,
                "generation failed"
            );
        }
        result
    }

    async fn relay(
        &self,
        request_id: Uuid,
        request: GenerationRequest,
    ) -> Result<String, RelayFailure> {
        request.validate()?;
        let endpoint = self.registry.lookup(&request.model)?.clone();

        let _permit = self.inflight.acquire().await.map_err(|_| {
            RelayFailure::new(
                ErrorKind::Network(NetworkFailure::ConnectionFailed),
                "relay is shutting down",
            )
        })?;

        debug!(%request_id, model = %request.model, %endpoint, "verifying backend model");
        match self.verifier.verify(&endpoint, &request.model).await {
            Verdict::Ok => {}
            Verdict::Mismatch { reported } => {
                return Err(RelayFailure::new(
                    ErrorKind::ModelMismatch,
                    format!(
                        "backend {endpoint} serves `{}` instead of `{}`; \
                         restart it with the requested model",
                        reported.as_deref().unwrap_or("<none>"),
                        request.model
                    ),
                ));
            }
            Verdict::Unreachable { reason } => {
                return Err(RelayFailure::new(
                    ErrorKind::Unreachable,
                    format!(
                        "could not verify model `{}` on {endpoint}: {reason}",
                        request.model
                    ),
                ));
            }
        }

        let model = request.model.clone();
        let payload = request.into_payload(&self.mount_prefix);
        debug!(%request_id, %endpoint, backend_model = %payload.model, "forwarding completion");

        let started = Instant::now();
        let response = match timeout(
            self.generate_timeout,
            self.backend.complete(&endpoint, &payload),
        )
        .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(error)) => {
                return Err(map_backend_error(error, &endpoint, &model, started.elapsed()))
            }
            Err(_) => {
                let elapsed = started.elapsed();
                return Err(RelayFailure::new(
                    ErrorKind::Network(NetworkFailure::Timeout { elapsed }),
                    format!(
                        "{endpoint} did not complete `{model}` within {}ms",
                        elapsed.as_millis()
                    ),
                ));
            }
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        let text = response.first_text().ok_or_else(|| {
            RelayFailure::new(
                ErrorKind::MalformedResponse,
                format!("{endpoint} returned no completion choices for `{model}`"),
            )
        })?;
        let text = text.trim().to_owned();

        let (prompt_tokens, completion_tokens) = response
            .usage
            .map(|usage| (usage.prompt_tokens, usage.completion_tokens))
            .unwrap_or_default();
        info!(
            %request_id,
            model = %model,
            %endpoint,
            latency_ms,
            prompt_tokens,
            completion_tokens,
            chars = text.len(),
            "completion relayed"
        );

        Ok(text)
    }
}

fn map_backend_error(
    error: BackendError,
    endpoint: &BackendEndpoint,
    model: &str,
    elapsed: Duration,
) -> RelayFailure {
    match error {
        BackendError::Connection(message) => RelayFailure::new(
            ErrorKind::Network(NetworkFailure::ConnectionFailed),
            format!("completion call to {endpoint} for `{model}` failed: {message}"),
        ),
        BackendError::Timeout(message) => RelayFailure::new(
            ErrorKind::Network(NetworkFailure::Timeout { elapsed }),
            format!("completion call to {endpoint} for `{model}` timed out: {message}"),
        ),
        BackendError::Status { status, body } => RelayFailure {
            message: format!("{endpoint} answered `{model}` with status {status}: {body}"),
            kind: ErrorKind::Backend { status, body },
        },
        BackendError::InvalidResponse(message) => RelayFailure::new(
            ErrorKind::MalformedResponse,
            format!("{endpoint} returned an unreadable completion for `{model}`: {message}"),
        ),
    }
}
