use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{ErrorKind, RelayFailure};

pub const MIN_MAX_TOKENS: u32 = 1;
pub const MAX_MAX_TOKENS: u32 = 512;
pub const DEFAULT_MAX_TOKENS: u32 = 50;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BackendEndpoint {
    pub host: String,
    pub port: u16,
}

impl BackendEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        let value = value.trim();
        let (host, port) = value
            .rsplit_once(':')
            .ok_or_else(|| format!("endpoint `{value}` must be host:port"))?;
        if host.is_empty() {
            return Err(format!("endpoint `{value}` has an empty host"));
        }
        let port = port
            .parse::<u16>()
            .map_err(|error| format!("endpoint `{value}` has an invalid port: {error}"))?;
        Ok(Self::new(host, port))
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url(), path.trim_start_matches('/'))
    }
}

impl fmt::Display for BackendEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Text after the last `/`, ignoring trailing slashes.
///
/// Backends report identifiers under their local mount path
/// (`/models/org/name`), callers use the public form (`org/name`); both
/// reduce to `name`.
pub fn trailing_segment(model: &str) -> &str {
    let trimmed = model.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationRequest {
    pub model: String,
    pub prompt: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub stop: Option<Vec<String>>,
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

impl GenerationRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            max_tokens,
            temperature: None,
            top_p: None,
            stop: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_stop(mut self, stop: Vec<String>) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn validate(&self) -> Result<(), RelayFailure> {
        if self.model.trim().is_empty() {
            return Err(invalid("model is required"));
        }
        if self.prompt.trim().is_empty() {
            return Err(invalid("prompt must not be empty"));
        }
        if !(MIN_MAX_TOKENS..=MAX_MAX_TOKENS).contains(&self.max_tokens) {
            return Err(invalid(format!(
                "max_tokens must be between {MIN_MAX_TOKENS} and {MAX_MAX_TOKENS}, got {}",
                self.max_tokens
            )));
        }
        if let Some(temperature) = self.temperature {
            if !temperature.is_finite() || !(0.0..=2.0).contains(&temperature) {
                return Err(invalid(format!(
                    "temperature must be between 0 and 2, got {temperature}"
                )));
            }
        }
        if let Some(top_p) = self.top_p {
            if !top_p.is_finite() || top_p <= 0.0 || top_p > 1.0 {
                return Err(invalid(format!("top_p must be in (0, 1], got {top_p}")));
            }
        }
        if let Some(stop) = &self.stop {
            if stop.iter().any(String::is_empty) {
                return Err(invalid("stop sequences must not be empty strings"));
            }
        }
        Ok(())
    }

    pub fn into_payload(self, mount_prefix: &str) -> CompletionPayload {
        CompletionPayload {
            model: mount_path(mount_prefix, &self.model),
            prompt: self.prompt,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
            stop: self.stop,
        }
    }
}

pub fn mount_path(mount_prefix: &str, model: &str) -> String {
    let prefix = mount_prefix.trim_end_matches('/');
    format!("{prefix}/{}", model.trim_start_matches('/'))
}

fn invalid(message: impl Into<String>) -> RelayFailure {
    RelayFailure::new(ErrorKind::InvalidRequest, message)
}

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationResult {
    Success { text: String },
    Failure { kind: ErrorKind, message: String },
}

impl GenerationResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn kind(&self) -> Option<&ErrorKind> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { kind, .. } => Some(kind),
        }
    }
}

impl From<Result<String, RelayFailure>> for GenerationResult {
    fn from(value: Result<String, RelayFailure>) -> Self {
        match value {
            Ok(text) => Self::Success { text },
            Err(failure) => Self::Failure {
                kind: failure.kind,
                message: failure.message,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionPayload {
    pub model: String,
    pub prompt: String,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
    #[serde(default)]
    pub usage: Option<CompletionUsage>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CompletionChoice {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct CompletionUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
}

impl CompletionResponse {
    pub fn first_text(&self) -> Option<&str> {
        self.choices.first()?.text.as_deref()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelListing {
    pub data: Vec<ModelCard>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelCard {
    pub id: String,
}

impl ModelListing {
    pub fn single(id: impl Into<String>) -> Self {
        Self {
            data: vec![ModelCard { id: id.into() }],
        }
    }

    pub fn first_id(&self) -> Option<&str> {
        self.data.first().map(|card| card.id.as_str())
    }
}
