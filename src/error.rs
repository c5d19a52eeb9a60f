//! Domain error taxonomy shared by the engines and the HTTP layer.
//!
//! Services raise these; the HTTP layer translates them into response
//! envelopes. Background event handlers never propagate errors to the
//! originating request; they log and continue.

use thiserror::Error;

use crate::kv::KvError;

/// Errors surfaced by the engines.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Rejected input (address format, length, enum). Returned as 400.
    #[error("{0}")]
    Validation(String),

    /// User or resource absent when required. Returned as 404.
    #[error("{0}")]
    NotFound(String),

    /// Upstream rate limiting survived the retry executor. Returned as 429.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Network timeout, store disconnect, connection closed mid-operation.
    /// Returned as 500 with a human message; no internals exposed.
    #[error("{0}")]
    Transient(String),

    /// Unique-constraint style conflicts. Returned as 409.
    #[error("{0}")]
    Conflict(String),
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::RateLimited(_) => 429,
            Self::Transient(_) => 500,
        }
    }
}

impl From<KvError> for ApiError {
    fn from(err: KvError) -> Self {
        Self::Transient(format!("cache unavailable: {err}"))
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        if crate::exec::is_rate_limited(&err) {
            Self::RateLimited(err.to_string())
        } else {
            Self::Transient(err.to_string())
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
