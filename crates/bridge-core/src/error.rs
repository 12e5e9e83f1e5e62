//! Crate-spanning error kinds.
//!
//! Handlers across every bridge crate return this type up to the dispatcher.
//! The dispatcher logs structured context but never re-raises into the
//! worker — a single handler failure must not take a worker down.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Remote repo token rejected or revoked. Reported verbatim; prompts
    /// the user to re-authenticate.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Platform or LLM signalled 429/rate-limit.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Size >= 97% (normal writes) or >= 100% (issue create).
    #[error("near capacity: {percentage:.1}% used")]
    NearCapacity { percentage: f64 },

    /// Period counter >= tier limit.
    #[error("quota exceeded: {used}/{limit} this period (next tier allows {next_tier_limit})")]
    QuotaExceeded {
        used: u64,
        limit: u64,
        next_tier_limit: u64,
    },

    /// File lock not acquired before the caller's deadline.
    #[error("lock timeout acquiring {0}")]
    LockTimeout(String),

    /// Pending key missing, or referenced file absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Network error or 5xx. Never includes secret material.
    #[error("transient error: {0}")]
    Transient(String),

    /// Path traversal, bad file index, empty comment, TODO with a newline.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Command not in the closed set.
    #[error("unknown command: {0}")]
    UnknownCommand(String),
}

impl BridgeError {
    /// Whether a read-only caller may retry this error exactly once
    ///. Never true for
    /// commit/issue-create paths regardless of this answer — callers must
    /// gate that separately.
    pub fn retryable_once(&self) -> bool {
        matches!(self, BridgeError::Transient(_))
    }
}

impl From<crate::model::ValidationError> for BridgeError {
    fn from(e: crate::model::ValidationError) -> Self {
        BridgeError::Validation(e.to_string())
    }
}
