//! Unified application error taxonomy.
//!
//! Module-level errors (database, cache, provider, ...) converge here; the
//! RPC surface maps each variant to a stable code and an HTTP status, so no
//! handler invents its own mapping.

use crate::cache::error::CacheError;
use crate::database::error::DatabaseError;
use crate::domain::payment::DomainError;
use crate::providers::error::ProviderError;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("order {order_id} is not payable (status: {status})")]
    InvalidOrderState { order_id: String, status: String },

    #[error("line item total {item_total} does not match converted amount {expected}")]
    AmountMismatch { item_total: i64, expected: i64 },

    #[error("provider refused to cancel order {provider_order_id}")]
    ProviderCancelFailed { provider_order_id: String },

    #[error("deadline exceeded calling {service}")]
    Timeout { service: &'static str },

    #[error("another request with this idempotency key is in progress")]
    InProgress,

    #[error("currency conversion failed: {0}")]
    CurrencyConversion(String),

    #[error("webhook signature verification failed")]
    SignatureInvalid,

    #[error("a valid idempotency-key header (UUID) is required")]
    MissingIdempotencyKey,

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("event publish failed: {0}")]
    Publish(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable code surfaced in RPC error responses.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound { .. } => "NOT_FOUND",
            AppError::Domain(DomainError::InvalidTransition { .. })
            | AppError::Domain(DomainError::InvalidSessionTransition { .. })
            | AppError::InvalidOrderState { .. }
            | AppError::ProviderCancelFailed { .. } => "FAILED_PRECONDITION",
            AppError::Domain(_) | AppError::MissingIdempotencyKey => "INVALID_ARGUMENT",
            AppError::AmountMismatch { .. } => "FAILED_PRECONDITION",
            AppError::Timeout { .. } => "DEADLINE_EXCEEDED",
            AppError::InProgress => "ABORTED",
            AppError::CurrencyConversion(_) => "FAILED_PRECONDITION",
            AppError::SignatureInvalid => "INVALID_ARGUMENT",
            AppError::Database(_)
            | AppError::Cache(_)
            | AppError::Provider(_)
            | AppError::Publish(_)
            | AppError::Internal(_) => "INTERNAL",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            AppError::NotFound { .. } => 404,
            AppError::Domain(DomainError::InvalidTransition { .. })
            | AppError::Domain(DomainError::InvalidSessionTransition { .. }) => 409,
            AppError::Domain(_) => 400,
            AppError::InvalidOrderState { .. } => 422,
            AppError::AmountMismatch { .. } => 422,
            AppError::ProviderCancelFailed { .. } => 502,
            AppError::Timeout { .. } => 504,
            AppError::InProgress => 409,
            AppError::CurrencyConversion(_) => 422,
            AppError::SignatureInvalid => 401,
            AppError::MissingIdempotencyKey => 400,
            AppError::Provider(err) => err.http_status_code(),
            AppError::Database(_)
            | AppError::Cache(_)
            | AppError::Publish(_)
            | AppError::Internal(_) => 500,
        }
    }

    /// Whether the caller may retry with the same idempotency key.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::InProgress | AppError::Timeout { .. } => true,
            AppError::Provider(err) => err.is_retryable(),
            AppError::Database(err) => err.is_retryable(),
            AppError::Cache(_) | AppError::Publish(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::payment::PaymentStatus;

    #[test]
    fn invalid_transition_maps_to_failed_precondition() {
        let err = AppError::Domain(DomainError::InvalidTransition {
            from: PaymentStatus::Cancelled,
            to: PaymentStatus::Success,
        });
        assert_eq!(err.code(), "FAILED_PRECONDITION");
        assert_eq!(err.http_status(), 409);
    }

    #[test]
    fn in_progress_is_retryable_aborted() {
        let err = AppError::InProgress;
        assert_eq!(err.code(), "ABORTED");
        assert!(err.is_retryable());
    }

    #[test]
    fn missing_key_is_invalid_argument() {
        assert_eq!(AppError::MissingIdempotencyKey.code(), "INVALID_ARGUMENT");
        assert_eq!(AppError::MissingIdempotencyKey.http_status(), 400);
    }

    #[test]
    fn not_found_maps_cleanly() {
        let err = AppError::NotFound {
            entity: "payment",
            id: "p1".to_string(),
        };
        assert_eq!(err.code(), "NOT_FOUND");
        assert_eq!(err.http_status(), 404);
        assert!(!err.is_retryable());
    }
}
