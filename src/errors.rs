use std::{fmt, time::Duration};

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidRequest,
    UnknownModel,
    Unreachable,
    ModelMismatch,
    Network(NetworkFailure),
    Backend { status: u16, body: String },
    MalformedResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkFailure {
    Timeout { elapsed: Duration },
    ConnectionFailed,
}

impl ErrorKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::UnknownModel => "unknown_model",
            Self::Unreachable => "unreachable",
            Self::ModelMismatch => "model_mismatch",
            Self::Network(NetworkFailure::Timeout { .. }) => "network_timeout",
            Self::Network(NetworkFailure::ConnectionFailed) => "network_connection_failed",
            Self::Backend { .. } => "backend_error",
            Self::MalformedResponse => "malformed_response",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct RelayFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl RelayFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no backends configured: set RELAY_BACKENDS or RELAY_BACKENDS_FILE")]
    EmptyRegistry,
    #[error("invalid backend entry `{entry}`: {reason}")]
    InvalidEntry { entry: String, reason: String },
    #[error("failed to read backend file {path}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse backend file {path}: {source}")]
    ParseFile {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Relay(#[from] RelayFailure),
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::BadRequest(message) => {
                make_error_response(StatusCode::BAD_REQUEST, "invalid_request", message)
            }
            AppError::Relay(failure) => make_error_response(
                status_for(&failure.kind),
                failure.kind.label(),
                failure.message,
            ),
        }
    }
}

pub fn status_for(kind: &ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidRequest | ErrorKind::UnknownModel => StatusCode::BAD_REQUEST,
        ErrorKind::ModelMismatch => StatusCode::CONFLICT,
        ErrorKind::Unreachable
        | ErrorKind::Network(_)
        | ErrorKind::Backend { .. }
        | ErrorKind::MalformedResponse => StatusCode::BAD_GATEWAY,
    }
}

fn make_error_response(status: StatusCode, error_type: &str, message: String) -> Response {
    let payload = ErrorEnvelope {
        error: ErrorBody {
            message,
            error_type: error_type.to_owned(),
        },
    };

    (status, Json(payload)).into_response()
}
