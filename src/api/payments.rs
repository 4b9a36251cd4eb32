//! Synchronous payment RPC surface.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::payment::{Payment, Provider};
use crate::providers::types::ResolveRequest;
use crate::services::orchestrator::{
    CancelPaymentResult, CreatePaymentRequest, CreatePaymentResult, ResolvePaymentResult,
};

use super::response::{
    failure, get_request_id_from_headers, require_idempotency_key, success, ApiResult,
};
use super::ApiState;

#[derive(Debug, Deserialize)]
pub struct CreatePaymentApiRequest {
    pub user_id: Uuid,
    pub order_id: Uuid,
    pub provider: String,
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CancelPaymentApiRequest {
    pub provider: String,
    pub provider_order_id: String,
    pub reason: Option<String>,
}

/// POST /api/payments
pub async fn create_payment(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(payload): Json<CreatePaymentApiRequest>,
) -> ApiResult<CreatePaymentResult> {
    let request_id = get_request_id_from_headers(&headers);
    let idempotency_key =
        require_idempotency_key(&headers).map_err(|e| failure(&e, request_id.clone()))?;
    let provider = Provider::from_str(&payload.provider)
        .map_err(|e| failure(&e.into(), request_id.clone()))?;

    let request = CreatePaymentRequest {
        user_id: payload.user_id,
        order_id: payload.order_id,
        provider,
        success_url: payload.success_url,
        cancel_url: payload.cancel_url,
    };

    state
        .orchestrator
        .create_payment(request, idempotency_key)
        .await
        .map(success)
        .map_err(|e| failure(&e, request_id))
}

/// POST /api/payments/resolve
pub async fn resolve_payment(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(payload): Json<ResolveRequest>,
) -> ApiResult<ResolvePaymentResult> {
    let request_id = get_request_id_from_headers(&headers);
    let idempotency_key =
        require_idempotency_key(&headers).map_err(|e| failure(&e, request_id.clone()))?;

    state
        .orchestrator
        .resolve_payment(payload, idempotency_key)
        .await
        .map(success)
        .map_err(|e| failure(&e, request_id))
}

/// POST /api/payments/cancel
pub async fn cancel_payment(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(payload): Json<CancelPaymentApiRequest>,
) -> ApiResult<CancelPaymentResult> {
    let request_id = get_request_id_from_headers(&headers);
    let idempotency_key =
        require_idempotency_key(&headers).map_err(|e| failure(&e, request_id.clone()))?;
    let provider = Provider::from_str(&payload.provider)
        .map_err(|e| failure(&e.into(), request_id.clone()))?;

    state
        .orchestrator
        .cancel_payment(
            provider,
            payload.provider_order_id,
            payload.reason,
            idempotency_key,
        )
        .await
        .map(success)
        .map_err(|e| failure(&e, request_id))
}

/// GET /api/payments/:id
pub async fn get_payment(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(payment_id): Path<Uuid>,
) -> ApiResult<Payment> {
    let request_id = get_request_id_from_headers(&headers);
    state
        .orchestrator
        .get_payment(payment_id)
        .await
        .map(success)
        .map_err(|e| failure(&e, request_id))
}
