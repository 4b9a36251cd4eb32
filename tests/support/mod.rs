//! In-memory fakes for the orchestrator's ports.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use payment_service::cache::store::MemoryStore;
use payment_service::clients::{Course, CourseClient, Order, OrderAmount, OrderClient, OrderItem};
use payment_service::database::error::DatabaseError;
use payment_service::database::payment_store::PaymentStore;
use payment_service::domain::events::{LifecycleEventKind, OrderPaymentEvent, ProviderEvent};
use payment_service::domain::payment::{Payment, Provider};
use payment_service::error::AppResult;
use payment_service::events::publisher::EventPublisher;
use payment_service::providers::error::ProviderResult;
use payment_service::providers::types::{
    CancelOutcome, CreateSessionRequest, CreatedSession, RefundOutcome, RefundRequest,
    RefundStatus, ResolveOutcome, ResolveRequest, SessionCompletion,
};
use payment_service::providers::{PaymentProvider, ProviderFactory};
use payment_service::services::exchange_rate::{
    ExchangeRateConfig, ExchangeRateError, ExchangeRateResult, ExchangeRateService, RateQuote,
    RateSource,
};
use payment_service::services::idempotency::{IdempotencyConfig, IdempotencyEngine};
use payment_service::services::orchestrator::{OrchestratorConfig, PaymentOrchestrator};

pub struct MemoryPaymentStore {
    payments: Mutex<HashMap<Uuid, Payment>>,
}

impl MemoryPaymentStore {
    pub fn new() -> Self {
        Self {
            payments: Mutex::new(HashMap::new()),
        }
    }

    pub fn count(&self) -> usize {
        self.payments.lock().unwrap().len()
    }

    pub fn get(&self, id: Uuid) -> Option<Payment> {
        self.payments.lock().unwrap().get(&id).cloned()
    }

    /// Test hook for manufacturing states `Payment::new` refuses to build,
    /// e.g. an already-expired PENDING payment.
    pub fn mutate<F: FnOnce(&mut Payment)>(&self, id: Uuid, f: F) {
        let mut payments = self.payments.lock().unwrap();
        if let Some(payment) = payments.get_mut(&id) {
            f(payment);
        }
    }
}

#[async_trait]
impl PaymentStore for MemoryPaymentStore {
    async fn insert(&self, payment: &Payment) -> Result<(), DatabaseError> {
        self.payments
            .lock()
            .unwrap()
            .insert(payment.id, payment.clone());
        Ok(())
    }

    async fn update(&self, payment: &Payment) -> Result<(), DatabaseError> {
        self.payments
            .lock()
            .unwrap()
            .insert(payment.id, payment.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>, DatabaseError> {
        Ok(self.payments.lock().unwrap().get(&id).cloned())
    }

    async fn find_by_idempotency_key(&self, key: Uuid) -> Result<Option<Payment>, DatabaseError> {
        Ok(self
            .payments
            .lock()
            .unwrap()
            .values()
            .find(|p| p.idempotency_key == key)
            .cloned())
    }

    async fn find_by_provider_order_id(
        &self,
        provider_order_id: &str,
    ) -> Result<Option<Payment>, DatabaseError> {
        Ok(self
            .payments
            .lock()
            .unwrap()
            .values()
            .find(|p| p.provider_order_id.as_deref() == Some(provider_order_id))
            .cloned())
    }

    async fn find_expired_pending(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Payment>, DatabaseError> {
        let mut expired: Vec<Payment> = self
            .payments
            .lock()
            .unwrap()
            .values()
            .filter(|p| {
                p.status == payment_service::domain::payment::PaymentStatus::Pending
                    && p.expires_at <= now
            })
            .cloned()
            .collect();
        expired.sort_by_key(|p| p.expires_at);
        expired.truncate(limit as usize);
        Ok(expired)
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    pub lifecycle: Mutex<Vec<(LifecycleEventKind, OrderPaymentEvent)>>,
    pub provider_events: Mutex<Vec<ProviderEvent>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, kind: LifecycleEventKind) -> usize {
        self.lifecycle
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .count()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish_lifecycle(
        &self,
        kind: LifecycleEventKind,
        payload: &OrderPaymentEvent,
    ) -> AppResult<()> {
        self.lifecycle.lock().unwrap().push((kind, payload.clone()));
        Ok(())
    }

    async fn publish_provider_event(&self, event: &ProviderEvent) -> AppResult<()> {
        self.provider_events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

pub struct StubOrderClient {
    pub order: Order,
}

#[async_trait]
impl OrderClient for StubOrderClient {
    async fn get_order_by_id(&self, _order_id: Uuid, _user_id: Uuid) -> AppResult<Order> {
        Ok(self.order.clone())
    }
}

pub struct StubCourseClient;

#[async_trait]
impl CourseClient for StubCourseClient {
    async fn get_courses_by_ids(&self, ids: &[Uuid]) -> AppResult<HashMap<Uuid, Course>> {
        Ok(ids
            .iter()
            .map(|id| {
                (
                    *id,
                    Course {
                        title: format!("Course {}", id),
                        description: "A test course".to_string(),
                        thumbnail: None,
                    },
                )
            })
            .collect())
    }
}

pub struct FixedRateSource {
    pub rate: String,
}

#[async_trait]
impl RateSource for FixedRateSource {
    async fn fetch_rate(&self, _base: &str, _target: &str) -> ExchangeRateResult<RateQuote> {
        let rate = BigDecimal::from_str(&self.rate)
            .map_err(|e| ExchangeRateError::InvalidRate(e.to_string()))?;
        Ok(RateQuote {
            rate,
            timestamp: Utc::now(),
        })
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

pub struct StubProvider {
    pub provider: Provider,
    pub currencies: &'static [&'static str],
    pub order_prefix: String,
    pub create_calls: AtomicU32,
    pub resolve_verified: bool,
}

impl StubProvider {
    pub fn new(provider: Provider, currencies: &'static [&'static str]) -> Self {
        Self {
            provider,
            currencies,
            order_prefix: format!("{}_order", provider),
            create_calls: AtomicU32::new(0),
            resolve_verified: true,
        }
    }

    pub fn create_call_count(&self) -> u32 {
        self.create_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentProvider for StubProvider {
    fn name(&self) -> Provider {
        self.provider
    }

    async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> ProviderResult<CreatedSession> {
        let call = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let completion = match self.provider {
            Provider::Stripe => SessionCompletion::Stripe {
                client_secret: Some("cs_secret".to_string()),
                checkout_url: Some("https://checkout.stripe.com/pay/cs_test".to_string()),
            },
            Provider::Paypal => SessionCompletion::Paypal {
                approval_url: "https://paypal.com/approve".to_string(),
            },
            Provider::Razorpay => SessionCompletion::Razorpay {
                key_id: "rzp_test".to_string(),
            },
        };
        Ok(CreatedSession {
            provider: self.provider,
            provider_order_id: format!("{}_{}", self.order_prefix, call),
            amount: request.amount,
            currency: request.currency.clone(),
            completion,
            metadata: serde_json::json!({}),
        })
    }

    async fn resolve(&self, request: &ResolveRequest) -> ProviderResult<ResolveOutcome> {
        let payment_id = match request {
            ResolveRequest::Razorpay { payment_id, .. } => Some(payment_id.clone()),
            _ => None,
        };
        Ok(ResolveOutcome {
            provider_status: if self.resolve_verified {
                "captured".to_string()
            } else {
                "failed".to_string()
            },
            verified: self.resolve_verified,
            provider_payment_id: payment_id,
        })
    }

    async fn cancel(
        &self,
        _provider_order_id: &str,
        _reason: Option<&str>,
    ) -> ProviderResult<CancelOutcome> {
        Ok(CancelOutcome { success: true })
    }

    async fn refund(&self, _request: &RefundRequest) -> ProviderResult<RefundOutcome> {
        Ok(RefundOutcome {
            provider_refund_id: None,
            status: RefundStatus::Pending,
        })
    }

    fn supported_currencies(&self) -> &'static [&'static str] {
        self.currencies
    }

    async fn is_available(&self) -> bool {
        true
    }
}

pub struct Harness {
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub store: Arc<MemoryPaymentStore>,
    pub cache: Arc<MemoryStore>,
    pub publisher: Arc<RecordingPublisher>,
    pub provider: Arc<StubProvider>,
    pub user_id: Uuid,
    pub order_id: Uuid,
}

pub fn order_of(order_id: Uuid, total: i64, currency: &str) -> Order {
    Order {
        id: order_id,
        amount: OrderAmount {
            total,
            currency: currency.to_string(),
            sales_tax: None,
            discount: None,
        },
        status: "pending_payment".to_string(),
        items: vec![OrderItem {
            course_id: Uuid::new_v4(),
            price: total,
            currency: currency.to_string(),
        }],
    }
}

pub fn harness(provider: Provider, currencies: &'static [&'static str], order: Order) -> Harness {
    let store = Arc::new(MemoryPaymentStore::new());
    let cache = Arc::new(MemoryStore::new());
    let publisher = Arc::new(RecordingPublisher::new());
    let stub = Arc::new(StubProvider::new(provider, currencies));

    let rates = Arc::new(ExchangeRateService::new(
        Arc::new(FixedRateSource {
            rate: "1.08".to_string(),
        }),
        ExchangeRateConfig::default(),
    ));

    let user_id = Uuid::new_v4();
    let order_id = order.id;

    let orchestrator = Arc::new(PaymentOrchestrator::new(
        store.clone(),
        cache.clone(),
        IdempotencyEngine::new(cache.clone(), IdempotencyConfig::default()),
        Arc::new(ProviderFactory::new(vec![
            stub.clone() as Arc<dyn PaymentProvider>
        ])),
        Arc::new(StubOrderClient { order }),
        Arc::new(StubCourseClient),
        rates,
        publisher.clone(),
        OrchestratorConfig::default(),
    ));

    Harness {
        orchestrator,
        store,
        cache,
        publisher,
        provider: stub,
        user_id,
        order_id,
    }
}
