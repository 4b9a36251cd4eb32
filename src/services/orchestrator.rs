//! Payment use-case orchestration.
//!
//! Every mutating entry point loads the aggregate, asks the state machine
//! for a transition, persists payment and session in one step, then
//! publishes the lifecycle event. Webhook- and RPC-driven paths converge
//! here; neither mutates state on its own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::keys::timeout::TimeoutKey;
use crate::cache::store::KeyValueStore;
use crate::clients::{CourseClient, OrderClient};
use crate::database::payment_store::PaymentStore;
use crate::domain::events::{LifecycleEventKind, OrderPaymentEvent};
use crate::domain::payment::{
    DomainError, Payment, PaymentStatus, Provider, ProviderSession, SessionStatus,
};
use crate::error::{AppError, AppResult};
use crate::events::publisher::EventPublisher;
use crate::providers::error::ProviderError;
use crate::providers::types::{
    CreateSessionRequest, LineItem, ResolveRequest, SessionCompletion,
};
use crate::providers::ProviderFactory;
use crate::services::exchange_rate::{convert_minor, ExchangeRateService};
use crate::services::idempotency::IdempotencyEngine;

/// Conversion factors for the minor -> major -> minor FX path.
const CONVERSION_FACTOR: i64 = 100;
/// Permitted drift between item sums and converted totals, minor units.
const AMOUNT_TOLERANCE: i64 = 1;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub payment_expiry: Duration,
    pub create_retries: u32,
    pub resolve_retries: u32,
    pub cancel_retries: u32,
    pub default_success_url: String,
    pub default_cancel_url: String,
    /// Currency every unsupported original currency converts into.
    pub settlement_currency: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            payment_expiry: Duration::from_secs(600),
            create_retries: 2,
            resolve_retries: 3,
            cancel_retries: 3,
            default_success_url: "https://localhost/payments/success".to_string(),
            default_cancel_url: "https://localhost/payments/cancel".to_string(),
            settlement_currency: "USD".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePaymentRequest {
    pub user_id: Uuid,
    pub order_id: Uuid,
    pub provider: Provider,
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePaymentResult {
    pub payment_id: Uuid,
    pub order_id: Uuid,
    pub provider: Provider,
    pub provider_order_id: String,
    /// Amount presented to the provider, minor units.
    pub amount: i64,
    pub currency: String,
    pub completion: SessionCompletion,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvePaymentResult {
    pub provider_status: String,
    pub is_verified: bool,
    pub payment_id: Uuid,
    pub order_id: Uuid,
    pub provider: Provider,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelPaymentResult {
    pub payment_id: Uuid,
    pub status: PaymentStatus,
}

/// Value stored under `payments:timeout:{id}`; the expiry listener only
/// needs the key, the payload exists for operators inspecting the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutRecord {
    pub payment_id: Uuid,
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

pub struct PaymentOrchestrator {
    store: Arc<dyn PaymentStore>,
    cache: Arc<dyn KeyValueStore>,
    idempotency: IdempotencyEngine,
    providers: Arc<ProviderFactory>,
    orders: Arc<dyn OrderClient>,
    courses: Arc<dyn CourseClient>,
    rates: Arc<ExchangeRateService>,
    publisher: Arc<dyn EventPublisher>,
    config: OrchestratorConfig,
}

impl PaymentOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn PaymentStore>,
        cache: Arc<dyn KeyValueStore>,
        idempotency: IdempotencyEngine,
        providers: Arc<ProviderFactory>,
        orders: Arc<dyn OrderClient>,
        courses: Arc<dyn CourseClient>,
        rates: Arc<ExchangeRateService>,
        publisher: Arc<dyn EventPublisher>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            cache,
            idempotency,
            providers,
            orders,
            courses,
            rates,
            publisher,
            config,
        }
    }

    // ------------------------------------------------------------------
    // CreatePayment
    // ------------------------------------------------------------------

    pub async fn create_payment(
        &self,
        request: CreatePaymentRequest,
        idempotency_key: Uuid,
    ) -> AppResult<CreatePaymentResult> {
        self.idempotency
            .run(idempotency_key, || {
                self.create_payment_inner(request, idempotency_key)
            })
            .await
    }

    async fn create_payment_inner(
        &self,
        request: CreatePaymentRequest,
        idempotency_key: Uuid,
    ) -> AppResult<CreatePaymentResult> {
        let order = self
            .orders
            .get_order_by_id(request.order_id, request.user_id)
            .await?;
        if !order.is_payable() {
            return Err(AppError::InvalidOrderState {
                order_id: order.id.to_string(),
                status: order.status,
            });
        }

        let course_ids: Vec<Uuid> = order.items.iter().map(|item| item.course_id).collect();
        let courses = self.courses.get_courses_by_ids(&course_ids).await?;

        let adapter = self.providers.get(request.provider)?;

        // FX: unsupported original currencies convert into the settlement
        // currency before the provider ever sees an amount.
        let (target_currency, rate_quote) =
            if adapter.is_currency_supported(&order.amount.currency) {
                (order.amount.currency.clone(), None)
            } else {
                let quote = self
                    .rates
                    .get_rate(&order.amount.currency, &self.config.settlement_currency)
                    .await?;
                (self.config.settlement_currency.clone(), Some(quote))
            };

        let converted_total = match &rate_quote {
            Some(quote) => convert_minor(
                order.amount.total,
                &quote.rate,
                CONVERSION_FACTOR,
                CONVERSION_FACTOR,
            )?,
            None => order.amount.total,
        };

        let mut line_items = Vec::with_capacity(order.items.len());
        for item in &order.items {
            let unit_amount = match &rate_quote {
                Some(quote) => {
                    convert_minor(item.price, &quote.rate, CONVERSION_FACTOR, CONVERSION_FACTOR)?
                }
                None => item.price,
            };
            let course = courses.get(&item.course_id);
            line_items.push(LineItem {
                name: course
                    .map(|c| c.title.clone())
                    .unwrap_or_else(|| format!("Course {}", item.course_id)),
                quantity: 1,
                unit_amount,
                currency: target_currency.clone(),
                image_url: course.and_then(|c| c.thumbnail.clone()),
            });
        }

        let item_total: i64 = line_items.iter().map(|item| item.total()).sum();
        if (item_total - converted_total).abs() > AMOUNT_TOLERANCE {
            return Err(AppError::AmountMismatch {
                item_total,
                expected: converted_total,
            });
        }

        let now = Utc::now();
        let existing = self.store.find_by_idempotency_key(idempotency_key).await?;
        let is_new = existing.is_none();
        let mut payment = match existing {
            Some(existing) => {
                // Persisted on an earlier attempt that died before its
                // result was cached; replay the stored session instead of
                // opening a second one with the provider.
                if let Some(result) = Self::result_from_existing(&existing) {
                    info!(payment_id = %existing.id, "reusing persisted payment for idempotency key");
                    return Ok(result);
                }
                existing
            }
            None => Payment::new(
                request.user_id,
                order.id,
                order.amount.total,
                order.amount.currency.clone(),
                idempotency_key,
                now + chrono::Duration::from_std(self.config.payment_expiry)
                    .unwrap_or_else(|_| chrono::Duration::seconds(600)),
                now,
            )?,
        };

        let session_request = CreateSessionRequest {
            user_id: request.user_id,
            order_id: order.id,
            amount: converted_total,
            currency: target_currency.clone(),
            idempotency_key,
            line_items,
            success_url: request
                .success_url
                .unwrap_or_else(|| self.config.default_success_url.clone()),
            cancel_url: request
                .cancel_url
                .unwrap_or_else(|| self.config.default_cancel_url.clone()),
            description: format!("Order {}", order.id),
            customer_email: None,
        };

        let created = retry_provider(self.config.create_retries, || {
            adapter.create_session(&session_request)
        })
        .await?;

        if (created.amount - converted_total).abs() > AMOUNT_TOLERANCE {
            return Err(AppError::AmountMismatch {
                item_total: created.amount,
                expected: converted_total,
            });
        }

        let session = ProviderSession {
            id: Uuid::new_v4(),
            payment_id: payment.id,
            provider: request.provider,
            provider_order_id: Some(created.provider_order_id.clone()),
            provider_payment_id: None,
            provider_amount: created.amount,
            provider_currency: created.currency.clone(),
            fx_rate: rate_quote.as_ref().map(|q| q.rate.clone()),
            fx_timestamp: rate_quote.as_ref().map(|q| q.timestamp),
            status: SessionStatus::Created,
            metadata: serde_json::json!({
                "completion": created.completion,
                "provider": created.metadata,
            }),
            created_at: now,
            updated_at: now,
        };
        payment.add_session(session);
        payment.provider_order_id = Some(created.provider_order_id.clone());

        if is_new {
            self.store.insert(&payment).await?;
        } else {
            self.store.update(&payment).await?;
        }

        self.schedule_timeout(&payment).await?;

        self.publisher
            .publish_lifecycle(
                LifecycleEventKind::Initiated,
                &OrderPaymentEvent::from_payment(&payment),
            )
            .await?;

        info!(
            payment_id = %payment.id,
            order_id = %order.id,
            provider = %request.provider,
            amount = converted_total,
            currency = %target_currency,
            "payment created"
        );

        Ok(CreatePaymentResult {
            payment_id: payment.id,
            order_id: order.id,
            provider: request.provider,
            provider_order_id: created.provider_order_id,
            amount: created.amount,
            currency: created.currency,
            completion: created.completion,
            expires_at: payment.expires_at,
        })
    }

    fn result_from_existing(payment: &Payment) -> Option<CreatePaymentResult> {
        let provider_order_id = payment.provider_order_id.clone()?;
        let session = payment.session_by_provider_order(&provider_order_id)?;
        let completion: SessionCompletion =
            serde_json::from_value(session.metadata.get("completion")?.clone()).ok()?;
        Some(CreatePaymentResult {
            payment_id: payment.id,
            order_id: payment.order_id,
            provider: session.provider,
            provider_order_id,
            amount: session.provider_amount,
            currency: session.provider_currency.clone(),
            completion,
            expires_at: payment.expires_at,
        })
    }

    async fn schedule_timeout(&self, payment: &Payment) -> AppResult<()> {
        let now = Utc::now();
        let remaining_ms = (payment.expires_at - now).num_milliseconds().max(0);
        let ttl_secs = ((remaining_ms + 999) / 1000).max(1) as u64;

        let record = TimeoutRecord {
            payment_id: payment.id,
            order_id: payment.order_id,
            user_id: payment.user_id,
            expires_at: payment.expires_at,
        };
        let key = TimeoutKey::new(payment.id).to_string();
        let value = serde_json::to_string(&record)
            .map_err(|e| AppError::Internal(format!("timeout record serialization: {}", e)))?;
        self.cache
            .set(&key, &value, Some(Duration::from_secs(ttl_secs)))
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // ResolvePayment
    // ------------------------------------------------------------------

    pub async fn resolve_payment(
        &self,
        request: ResolveRequest,
        idempotency_key: Uuid,
    ) -> AppResult<ResolvePaymentResult> {
        self.idempotency
            .run(idempotency_key, || self.resolve_payment_inner(request))
            .await
    }

    async fn resolve_payment_inner(
        &self,
        request: ResolveRequest,
    ) -> AppResult<ResolvePaymentResult> {
        let provider = request.provider();
        let provider_order_id = request.provider_order_id().to_string();

        let mut payment = self
            .store
            .find_by_provider_order_id(&provider_order_id)
            .await?
            .ok_or_else(|| AppError::NotFound {
                entity: "payment",
                id: provider_order_id.clone(),
            })?;

        let adapter = self.providers.get(provider)?;
        let outcome = retry_provider(self.config.resolve_retries, || adapter.resolve(&request))
            .await?;

        let now = Utc::now();
        if outcome.verified {
            payment.capture_session(
                &provider_order_id,
                outcome.provider_payment_id.clone(),
                now,
            )?;
            if payment.status == PaymentStatus::Pending {
                payment.transition_to(PaymentStatus::Resolved, now)?;
            }
            self.store.update(&payment).await?;
        }

        info!(
            payment_id = %payment.id,
            provider = %provider,
            verified = outcome.verified,
            provider_status = %outcome.provider_status,
            "payment resolved"
        );

        // The authoritative success event arrives via webhook; no bus
        // message here.
        Ok(ResolvePaymentResult {
            provider_status: outcome.provider_status,
            is_verified: outcome.verified,
            payment_id: payment.id,
            order_id: payment.order_id,
            provider,
        })
    }

    // ------------------------------------------------------------------
    // CancelPayment
    // ------------------------------------------------------------------

    pub async fn cancel_payment(
        &self,
        provider: Provider,
        provider_order_id: String,
        reason: Option<String>,
        idempotency_key: Uuid,
    ) -> AppResult<CancelPaymentResult> {
        self.idempotency
            .run(idempotency_key, || {
                self.cancel_payment_inner(provider, provider_order_id, reason)
            })
            .await
    }

    async fn cancel_payment_inner(
        &self,
        provider: Provider,
        provider_order_id: String,
        reason: Option<String>,
    ) -> AppResult<CancelPaymentResult> {
        let mut payment = self
            .store
            .find_by_provider_order_id(&provider_order_id)
            .await?
            .ok_or_else(|| AppError::NotFound {
                entity: "payment",
                id: provider_order_id.clone(),
            })?;

        if payment.status != PaymentStatus::Pending {
            return Err(AppError::Domain(DomainError::InvalidTransition {
                from: payment.status,
                to: PaymentStatus::Cancelled,
            }));
        }

        let adapter = self.providers.get(provider)?;
        let outcome = retry_provider(self.config.cancel_retries, || {
            adapter.cancel(&provider_order_id, reason.as_deref())
        })
        .await?;
        if !outcome.success {
            return Err(AppError::ProviderCancelFailed { provider_order_id });
        }

        let now = Utc::now();
        payment.fail_session(&provider_order_id, now)?;
        payment.transition_to(PaymentStatus::Cancelled, now)?;
        self.store.update(&payment).await?;

        self.publisher
            .publish_lifecycle(
                LifecycleEventKind::Failed,
                &OrderPaymentEvent::from_payment(&payment),
            )
            .await?;

        info!(payment_id = %payment.id, provider = %provider, "payment cancelled");
        Ok(CancelPaymentResult {
            payment_id: payment.id,
            status: payment.status,
        })
    }

    // ------------------------------------------------------------------
    // SuccessPayment / FailurePayment (webhook consumer entry points)
    // ------------------------------------------------------------------

    pub async fn success_payment(
        &self,
        provider: Provider,
        provider_order_id: &str,
    ) -> AppResult<()> {
        let mut payment = self
            .store
            .find_by_provider_order_id(provider_order_id)
            .await?
            .ok_or_else(|| AppError::NotFound {
                entity: "payment",
                id: provider_order_id.to_string(),
            })?;

        if payment.status == PaymentStatus::Success {
            info!(payment_id = %payment.id, "success replay ignored");
            return Ok(());
        }
        if !matches!(
            payment.status,
            PaymentStatus::Pending | PaymentStatus::Resolved
        ) {
            return Err(AppError::Domain(DomainError::InvalidTransition {
                from: payment.status,
                to: PaymentStatus::Success,
            }));
        }

        let now = Utc::now();
        payment.transition_to(PaymentStatus::Success, now)?;
        payment.capture_session(provider_order_id, None, now)?;
        self.store.update(&payment).await?;

        self.publisher
            .publish_lifecycle(
                LifecycleEventKind::Succeeded,
                &OrderPaymentEvent::from_payment(&payment),
            )
            .await?;

        info!(payment_id = %payment.id, provider = %provider, "payment succeeded");
        Ok(())
    }

    pub async fn failure_payment(
        &self,
        provider: Provider,
        provider_order_id: &str,
    ) -> AppResult<()> {
        let mut payment = self
            .store
            .find_by_provider_order_id(provider_order_id)
            .await?
            .ok_or_else(|| AppError::NotFound {
                entity: "payment",
                id: provider_order_id.to_string(),
            })?;

        if payment.status == PaymentStatus::Failed {
            info!(payment_id = %payment.id, "failure replay ignored");
            return Ok(());
        }
        if payment.status != PaymentStatus::Pending {
            return Err(AppError::Domain(DomainError::InvalidTransition {
                from: payment.status,
                to: PaymentStatus::Failed,
            }));
        }

        let now = Utc::now();
        payment.transition_to(PaymentStatus::Failed, now)?;
        payment.fail_session(provider_order_id, now)?;
        self.store.update(&payment).await?;

        self.publisher
            .publish_lifecycle(
                LifecycleEventKind::Failed,
                &OrderPaymentEvent::from_payment(&payment),
            )
            .await?;

        info!(payment_id = %payment.id, provider = %provider, "payment failed");
        Ok(())
    }

    // ------------------------------------------------------------------
    // HandlePaymentTimeout
    // ------------------------------------------------------------------

    /// No-op on anything but PENDING, which makes the expiry listener and
    /// the sweeper mutually idempotent.
    pub async fn handle_timeout(&self, payment_id: Uuid) -> AppResult<()> {
        let mut payment = self
            .store
            .find_by_id(payment_id)
            .await?
            .ok_or_else(|| AppError::NotFound {
                entity: "payment",
                id: payment_id.to_string(),
            })?;

        if payment.status != PaymentStatus::Pending {
            return Ok(());
        }

        let now = Utc::now();
        payment.transition_to(PaymentStatus::Expired, now)?;
        let open_sessions: Vec<String> = payment
            .sessions
            .iter()
            .filter(|s| {
                !matches!(s.status, SessionStatus::Captured | SessionStatus::Failed)
            })
            .filter_map(|s| s.provider_order_id.clone())
            .collect();
        for provider_order_id in open_sessions {
            payment.fail_session(&provider_order_id, now)?;
        }
        self.store.update(&payment).await?;

        self.publisher
            .publish_lifecycle(
                LifecycleEventKind::Timeout,
                &OrderPaymentEvent::from_payment(&payment),
            )
            .await?;

        info!(payment_id = %payment.id, "payment expired");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    pub async fn get_payment(&self, payment_id: Uuid) -> AppResult<Payment> {
        self.store
            .find_by_id(payment_id)
            .await?
            .ok_or_else(|| AppError::NotFound {
                entity: "payment",
                id: payment_id.to_string(),
            })
    }

    pub async fn expired_pending(&self, now: DateTime<Utc>, limit: i64) -> AppResult<Vec<Payment>> {
        Ok(self.store.find_expired_pending(now, limit).await?)
    }
}

/// Bounded exponential retry for adapter calls; gives up immediately on
/// non-retryable provider errors.
async fn retry_provider<T, F, Fut>(max_retries: u32, op: F) -> Result<T, ProviderError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_retries => {
                warn!(attempt, error = %e, "provider call failed, retrying");
                tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
