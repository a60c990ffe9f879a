use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

use crate::{
    backend::InferenceBackend,
    models::{trailing_segment, BackendEndpoint},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Ok,
    Mismatch { reported: Option<String> },
    Unreachable { reason: String },
}

#[derive(Debug, Clone)]
pub struct VerificationRecord {
    pub endpoint: BackendEndpoint,
    pub reported_model: Option<String>,
    pub checked_at: Instant,
}

impl VerificationRecord {
    pub fn verdict_for(&self, expected_model: &str) -> Verdict {
        match self.reported_model.as_deref() {
            Some(reported) if trailing_segment(reported) == trailing_segment(expected_model) => {
                Verdict::Ok
            }
            reported => Verdict::Mismatch {
                reported: reported.map(ToOwned::to_owned),
            },
        }
    }
}

pub struct ModelVerifier {
    backend: Arc<dyn InferenceBackend>,
    timeout: Duration,
    cache_ttl: Duration,
    cache: DashMap<BackendEndpoint, VerificationRecord>,
}

impl ModelVerifier {
    pub fn new(backend: Arc<dyn InferenceBackend>, timeout: Duration, cache_ttl: Duration) -> Self {
        Self {
            backend,
            timeout,
            cache_ttl,
            cache: DashMap::new(),
        }
    }

    pub async fn verify(&self, endpoint: &BackendEndpoint, expected_model: &str) -> Verdict {
        let record = match self.cached(endpoint) {
            Some(record) => {
                debug!(%endpoint, "using cached verification");
                record
            }
            None => match self.check(endpoint).await {
                Ok(record) => {
                    if !self.cache_ttl.is_zero() {
                        self.cache.insert(endpoint.clone(), record.clone());
                    }
                    record
                }
                Err(reason) => {
                    warn!(
                        %endpoint,
                        model = %expected_model,
                        %reason,
                        "backend unreachable during verification"
                    );
                    return Verdict::Unreachable { reason };
                }
            },
        };

        let verdict = record.verdict_for(expected_model);
        match &verdict {
            Verdict::Ok => {
                debug!(%endpoint, model = %expected_model, "backend serves requested model")
            }
            Verdict::Mismatch { reported } => warn!(
                %endpoint,
                expected = %expected_model,
                reported = reported.as_deref().unwrap_or("<none>"),
                "backend serves a different model"
            ),
            Verdict::Unreachable { .. } => {}
        }
        verdict
    }

    pub async fn check(&self, endpoint: &BackendEndpoint) -> Result<VerificationRecord, String> {
        let listing = match timeout(self.timeout, self.backend.list_models(endpoint)).await {
            Ok(Ok(listing)) => listing,
            Ok(Err(error)) => return Err(error.to_string()),
            Err(_) => {
                return Err(format!(
                    "no model listing within {}ms",
                    self.timeout.as_millis()
                ))
            }
        };

        Ok(VerificationRecord {
            endpoint: endpoint.clone(),
            reported_model: listing.first_id().map(ToOwned::to_owned),
            checked_at: Instant::now(),
        })
    }

    pub fn invalidate(&self, endpoint: &BackendEndpoint) {
        self.cache.remove(endpoint);
    }

    fn cached(&self, endpoint: &BackendEndpoint) -> Option<VerificationRecord> {
        if self.cache_ttl.is_zero() {
            return None;
        }
        let record = self.cache.get(endpoint)?;
        (record.checked_at.elapsed() < self.cache_ttl).then(|| record.value().clone())
    }
}
