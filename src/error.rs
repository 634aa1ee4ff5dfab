//! Error taxonomy for the dashboard core.
//!
//! Transform-level numeric anomalies never surface here; they are recovered
//! through the global fallback cell in `transform`. A backend not-found is a
//! benign signal (local eviction, `None` result), not a failure the caller
//! has to handle specially.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("insufficient data: series has {len} points, need at least {min}")]
    InsufficientData { len: usize, min: usize },

    #[error("n/b computation produced no usable value ({context})")]
    NbComputation { context: String },

    #[error("invalid n/b value {value}: must be finite and within [0, 1]")]
    Validation { value: f64 },

    #[error("{operation} timed out after {timeout_secs}s")]
    RemoteTimeout {
        operation: String,
        timeout_secs: u64,
    },

    #[error("{operation} unavailable: {message}")]
    RemoteUnavailable {
        operation: String,
        message: String,
    },

    #[error("not found: {id}")]
    NotFound { id: String },
}

impl CoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::NotFound { .. })
    }

    /// Remote errors are worth retrying; everything else is deterministic.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::RemoteTimeout { .. } | CoreError::RemoteUnavailable { .. }
        )
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
