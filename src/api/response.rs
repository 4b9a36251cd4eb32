//! Standardized RPC response envelopes.
//!
//! Every response is a tagged union: `{status: "success", data}` or
//! `{status: "error", error: {code, message, details}}`. Codes are the
//! stable set from the error taxonomy, never ad-hoc strings.

use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Serialize)]
pub struct SuccessBody<T> {
    pub status: &'static str,
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct RpcError {
    pub code: &'static str,
    pub message: String,
    pub details: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
    pub retryable: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub status: &'static str,
    pub error: RpcError,
}

pub type ApiError = (StatusCode, Json<ErrorBody>);
pub type ApiResult<T> = Result<Json<SuccessBody<T>>, ApiError>;

pub fn success<T: Serialize>(data: T) -> Json<SuccessBody<T>> {
    Json(SuccessBody {
        status: "success",
        data,
    })
}

pub fn failure(err: &AppError, request_id: Option<String>) -> ApiError {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    if status.is_server_error() {
        tracing::error!(error = %err, request_id = ?request_id, "server error");
    } else {
        tracing::warn!(error = %err, request_id = ?request_id, "client error");
    }

    // Internal failures surface an opaque message; the detail stays in the
    // logs.
    let message = if err.code() == "INTERNAL" {
        "An internal error occurred. Please try again later.".to_string()
    } else {
        err.to_string()
    };

    (
        status,
        Json(ErrorBody {
            status: "error",
            error: RpcError {
                code: err.code(),
                message,
                details: Vec::new(),
                request_id,
                timestamp: Utc::now().to_rfc3339(),
                retryable: err.is_retryable(),
            },
        }),
    )
}

pub fn get_request_id_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// The idempotency key is a request-level header; absent or malformed
/// values are rejected before any work happens.
pub fn require_idempotency_key(headers: &HeaderMap) -> Result<Uuid, AppError> {
    let raw = headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::MissingIdempotencyKey)?;
    Uuid::parse_str(raw.trim()).map_err(|_| AppError::MissingIdempotencyKey)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_key_header_is_required() {
        let headers = HeaderMap::new();
        assert!(matches!(
            require_idempotency_key(&headers),
            Err(AppError::MissingIdempotencyKey)
        ));
    }

    #[test]
    fn malformed_idempotency_key_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert("idempotency-key", "not-a-uuid".parse().unwrap());
        assert!(require_idempotency_key(&headers).is_err());
    }

    #[test]
    fn valid_idempotency_key_parses() {
        let id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert("idempotency-key", id.to_string().parse().unwrap());
        assert_eq!(require_idempotency_key(&headers).unwrap(), id);
    }
}
