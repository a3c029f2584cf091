//! Error taxonomy shared by every component.
//!
//! One flat enum, same shape as the teacher's `#[error_code] pub enum
//! CasinoError` — a single source of truth a thin router can map to an HTTP
//! status without this crate knowing anything about HTTP.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("authentication required")]
    Unauthenticated,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("round is stale")]
    RoundStale,

    #[error("settlement window closed")]
    SettlementClosed,

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("downstream failure: {0}")]
    Downstream(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// HTTP status a thin router would use; kept here so the core never
    /// depends on an HTTP crate just to classify its own errors.
    pub fn status_code(&self) -> u16 {
        match self {
            CoreError::Unauthenticated => 401,
            CoreError::Forbidden(_) => 403,
            CoreError::Validation(_) => 400,
            CoreError::InsufficientFunds => 402,
            CoreError::Conflict(_) => 409,
            CoreError::NotFound(_) => 404,
            CoreError::RoundStale | CoreError::SettlementClosed => 400,
            CoreError::RateLimited { .. } => 429,
            CoreError::Downstream(_) => 502,
            CoreError::Internal(_) => 500,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::Unauthenticated => "unauthenticated",
            CoreError::Forbidden(_) => "forbidden",
            CoreError::Validation(_) => "validation",
            CoreError::InsufficientFunds => "insufficient_funds",
            CoreError::Conflict(_) => "conflict",
            CoreError::NotFound(_) => "not_found",
            CoreError::RoundStale => "round_stale",
            CoreError::SettlementClosed => "settlement_closed",
            CoreError::RateLimited { .. } => "rate_limited",
            CoreError::Downstream(_) => "downstream",
            CoreError::Internal(_) => "internal",
        }
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(e: sqlx::Error) -> Self {
        CoreError::Internal(e.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
