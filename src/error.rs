use anyhow::Error;
use axum::http::StatusCode;
use axum::{
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error as ThisError;

use crate::action::{Point, StepKey};

/// A malformed table or script. Always raised before a run starts.
#[derive(Debug, ThisError)]
pub enum ConfigError {
    #[error("step key must not be empty")]
    EmptyKey,

    #[error("duplicate step key `{0}`")]
    DuplicateKey(StepKey),

    #[error("step `{key}`: confidence {value} is outside [0, 1]")]
    Confidence { key: StepKey, value: f32 },

    #[error("step `{key}`: click count must be at least 1")]
    ClickCount { key: StepKey },

    #[error("step `{key}`: key action has no keys")]
    EmptyKeyAction { key: StepKey },

    #[error("step `{key}`: unknown key `{name}`")]
    UnknownKeyName { key: StepKey, name: String },

    #[error("max_attempts must be at least 1")]
    MaxAttempts,

    #[error("policy_violation: step `{key}` target `{target}` denied")]
    DeniedTarget { key: StepKey, target: String },

    #[error("policy_violation: step `{key}` point {point} out of bounds")]
    OutOfBounds { key: StepKey, point: Point },

    #[error("policy_violation: step `{key}` settle {ms}ms exceeds {max}ms")]
    SettleTooLong { key: StepKey, ms: u128, max: u64 },

    #[error("`{0}` has no numeric ordering prefix")]
    UnorderedStep(String),

    #[error("slot {slot} is ambiguous: {}", .stems.join(", "))]
    AmbiguousSlot { slot: u32, stems: Vec<String> },

    #[error("variant `{stem}` for slot `{slot}` not found")]
    UnknownVariant { slot: String, stem: String },

    #[error("override for unknown step `{0}`")]
    UnknownStep(String),

    #[error("step `{key}`: secret `{name}` is not set")]
    MissingSecret { key: StepKey, name: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid YAML in {path}: {source}")]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("invalid glob pattern: {0}")]
    Pattern(#[from] globset::Error),
}

/// Conditions that end a run early. Locate misses are not errors; they are
/// absorbed into the step outcome.
#[derive(Debug, ThisError)]
pub enum EngineError {
    #[error("aborted: {0}")]
    Aborted(String),

    #[error("locator failed for `{target}`: {cause:#}")]
    Locator { target: String, cause: Error },

    #[error("input driver failed: {0:#}")]
    Driver(Error),

    #[error("secret `{0}` is not available")]
    Secret(String),
}

#[derive(Serialize)]
pub struct ErrorBody {
    ok: bool,
    error: String,
}

pub enum ApiError {
    BadRequest(Error),
    NotFound(Error),
    Internal(Error),
}

impl<E: Into<Error>> From<E> for ApiError {
    fn from(e: E) -> Self {
        ApiError::Internal(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, e) = match self {
            ApiError::BadRequest(e) => (StatusCode::BAD_REQUEST, e),
            ApiError::NotFound(e) => (StatusCode::NOT_FOUND, e),
            ApiError::Internal(e) => (StatusCode::INTERNAL_SERVER_ERROR, e),
        };
        (
            status,
            Json(ErrorBody {
                ok: false,
                error: format!("{e:#}"),
            }),
        )
            .into_response()
    }
}

use std::fmt;

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::BadRequest(e) => write!(f, "BadRequest: {}", e),
            ApiError::NotFound(e) => write!(f, "NotFound: {}", e),
            ApiError::Internal(e) => write!(f, "Internal: {}", e),
        }
    }
}
