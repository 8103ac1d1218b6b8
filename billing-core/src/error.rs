use chrono::{DateTime, Utc};
use thiserror::Error;

/// Error taxonomy for the billing engine.
///
/// `Validation` and `Policy` are surfaced to the caller synchronously and are
/// never retried. `Contention` may be retried a bounded number of times by the
/// caller before being treated as fatal for the request. Storage and internal
/// errors map to a generic "try again" message at the edge.
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("policy violation: {0}")]
    Policy(String),

    #[error("refund window expired; refunds were accepted until {deadline}")]
    RefundWindowExpired { deadline: DateTime<Utc> },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(anyhow::Error),

    #[error("storage contention: {0}")]
    Contention(anyhow::Error),

    #[error("storage error: {0}")]
    Storage(anyhow::Error),

    #[error("configuration error: {0}")]
    Config(anyhow::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl BillingError {
    pub fn validation(msg: impl Into<String>) -> Self {
        BillingError::Validation(msg.into())
    }

    pub fn policy(msg: impl Into<String>) -> Self {
        BillingError::Policy(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        BillingError::NotFound(msg.into())
    }

    /// Whether the caller may retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BillingError::Contention(_))
    }
}
