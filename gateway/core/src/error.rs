//! Error taxonomy
//!
//! Only [`GatewayError::Validation`] and [`GatewayError::QuotaExceeded`] are
//! ever returned to callers synchronously (from `Submit`). Every other
//! variant is absorbed inside the gateway: retried, converted into an error
//! [`Response`](crate::request::Response), or logged and degraded.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::backend::BackendError;
use crate::cache::StoreError;

/// Which quota limit rejected a submission
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuotaViolation {
    /// Too many requests outstanding at once
    Concurrency {
        /// Tier limit that was hit
        limit: u32,
    },
    /// Too many requests inside the rolling one-minute window
    Rate {
        /// Tier limit that was hit
        limit: u32,
    },
}

impl fmt::Display for QuotaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Concurrency { limit } => write!(f, "{limit} concurrent requests outstanding"),
            Self::Rate { limit } => write!(f, "{limit} requests in the last minute"),
        }
    }
}

/// Gateway-level errors
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed request, rejected at submission
    #[error("invalid request: {0}")]
    Validation(String),

    /// Caller quota exhausted, rejected at submission
    #[error("quota exceeded for caller {caller}: {violation}")]
    QuotaExceeded {
        /// Caller identity
        caller: String,
        /// The limit that was hit
        violation: QuotaViolation,
    },

    /// Inference backend unreachable or failing
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Requested or hinted model does not exist on the backend
    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// Internal per-call backend timeout
    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),

    /// Shared cache tier unreachable
    #[error("shared cache unavailable: {0}")]
    CacheUnavailable(String),
}

impl From<BackendError> for GatewayError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::ModelNotFound(model) => Self::ModelNotFound(model),
            BackendError::Timeout(after) => Self::Timeout(after),
            other => Self::BackendUnavailable(other.to_string()),
        }
    }
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        Self::CacheUnavailable(err.to_string())
    }
}

/// Outcome of `Await` when no Response is available
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AwaitError {
    /// No result within the timeout; the work keeps running
    #[error("timed out after {0:?} waiting for a response")]
    TimedOut(Duration),

    /// The id was never submitted, or its result has been pruned
    #[error("unknown request id: {0}")]
    UnknownRequest(String),
}

/// Result alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;
