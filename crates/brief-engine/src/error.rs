use brief_core::errors::GatewayError;
use brief_core::quota::RateLimitDecision;
use brief_store::sessions::SessionStatus;
use brief_store::StoreError;

use crate::validate::ValidationError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Caller-supplied data violates a structural contract. Never retried;
    /// surfaced verbatim.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Configuration or model-gateway failure during synthesis. The
    /// wrapped error's `is_retryable()` tells the caller whether a retry
    /// with the same input can help.
    #[error("synthesis failed: {0}")]
    Synthesis(#[from] GatewayError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Not an exceptional failure: the user has simply used up their
    /// tier's session quota. Carries the decision so callers can render
    /// limit/remaining/tier.
    #[error("session quota exhausted for tier {}", .0.tier)]
    QuotaExhausted(RateLimitDecision),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session is {status}, cannot {action}")]
    InvalidTransition {
        status: SessionStatus,
        action: &'static str,
    },

    #[error("{0}")]
    Internal(String),
}
