use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tracing::{error, info};
use uuid::Uuid;

use payment_service::api::{payments, webhooks, ApiState};
use payment_service::cache::store::{KeyValueStore, RedisStore};
use payment_service::clients::{HttpCourseClient, HttpOrderClient};
use payment_service::config::AppConfig;
use payment_service::database::payment_store::PostgresPaymentStore;
use payment_service::events::consumer::ProviderEventConsumer;
use payment_service::events::publisher::{EventPublisher, KafkaEventPublisher};
use payment_service::health::{HealthChecker, HealthReport};
use payment_service::logging::init_tracing;
use payment_service::providers::ProviderFactory;
use payment_service::services::exchange_rate::{
    ExchangeRateConfig, ExchangeRateService, FrankfurterRateSource,
};
use payment_service::services::idempotency::{IdempotencyConfig, IdempotencyEngine};
use payment_service::services::orchestrator::PaymentOrchestrator;
use payment_service::webhooks::verify::{PaypalVerification, WebhookVerifier};
use payment_service::workers::expiry_listener::ExpiryListener;
use payment_service::workers::sweeper::TimeoutSweeper;

#[derive(Clone, Copy)]
struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        Uuid::new_v4().to_string().parse().ok().map(RequestId::new)
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    config.validate()?;
    init_tracing(&config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "🚀 Starting payment service"
    );

    // Database
    info!("📊 Connecting payment store...");
    let store = Arc::new(PostgresPaymentStore::connect(&config.database).await?);
    info!("✅ Payment store ready");

    // Cache
    info!("🔄 Connecting Redis store...");
    let cache_store =
        RedisStore::connect(&config.cache.redis_url, config.cache.max_connections).await?;
    let kv_store: Arc<dyn KeyValueStore> = Arc::new(cache_store.clone());
    info!("✅ Redis store ready");

    // Providers
    let providers = Arc::new(ProviderFactory::from_env());

    // Bus
    let kafka_publisher = Arc::new(KafkaEventPublisher::new(&config.kafka)?);
    let publisher: Arc<dyn EventPublisher> = kafka_publisher.clone();

    // Cross-service clients and FX
    let orders = Arc::new(HttpOrderClient::new(config.services.order_service_url.clone())?);
    let courses = Arc::new(HttpCourseClient::new(config.services.course_service_url.clone())?);
    let rate_source = Arc::new(FrankfurterRateSource::new(config.services.fx_api_url.clone())?);
    let rates = Arc::new(
        ExchangeRateService::new(rate_source, ExchangeRateConfig::default())
            .with_cache(kv_store.clone()),
    );

    // Use-case layer
    let idempotency = IdempotencyEngine::new(kv_store.clone(), IdempotencyConfig::default());
    let orchestrator = Arc::new(PaymentOrchestrator::new(
        store.clone(),
        kv_store.clone(),
        idempotency,
        providers.clone(),
        orders,
        courses,
        rates,
        publisher.clone(),
        config.orchestrator_config(),
    ));

    // Webhook verification
    let verifier = Arc::new(WebhookVerifier::new(
        std::env::var("STRIPE_WEBHOOK_SECRET").ok(),
        std::env::var("RAZORPAY_WEBHOOK_SECRET").ok(),
        std::env::var("PAYPAL_WEBHOOK_ID").ok().map(|webhook_id| {
            PaypalVerification {
                webhook_id,
                cache: kv_store.clone(),
                client: reqwest::Client::new(),
            }
        }),
    ));

    let health_checker = HealthChecker::new(store.clone(), cache_store.clone(), providers.clone());

    // Background workers
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sweeper = TimeoutSweeper::new(orchestrator.clone(), config.sweeper_config());
    let sweeper_handle = tokio::spawn(sweeper.run(shutdown_rx.clone()));
    info!("✅ Timeout sweeper started");

    let listener_worker =
        ExpiryListener::new(config.cache.redis_url.clone(), orchestrator.clone());
    let listener_handle = tokio::spawn(listener_worker.run(shutdown_rx.clone()));
    info!("✅ Expiry listener started");

    let consumer = ProviderEventConsumer::new(&config.kafka, kv_store.clone(), orchestrator.clone())?;
    let consumer_handle = tokio::spawn(consumer.run(shutdown_rx.clone()));
    info!("✅ Provider event consumer started");

    // Routes
    let api_state = ApiState {
        orchestrator: orchestrator.clone(),
        verifier,
        publisher,
    };

    let payment_routes = Router::new()
        .route("/api/payments", post(payments::create_payment))
        .route("/api/payments/resolve", post(payments::resolve_payment))
        .route("/api/payments/cancel", post(payments::cancel_payment))
        .route("/api/payments/:id", get(payments::get_payment))
        .route("/api/webhooks/:provider", post(webhooks::handle_webhook))
        .with_state(api_state);

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .route("/health/live", get(liveness))
        .with_state(health_checker);

    let app = Router::new()
        .merge(payment_routes)
        .merge(health_routes)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(PropagateRequestIdLayer::x_request_id()),
        );

    let addr: std::net::SocketAddr =
        format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(address = %addr, "🚀 Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(shutdown_tx.clone()))
        .await?;

    let _ = shutdown_tx.send(true);
    for (name, handle) in [
        ("sweeper", sweeper_handle),
        ("expiry listener", listener_handle),
        ("consumer", consumer_handle),
    ] {
        if tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .is_err()
        {
            error!(worker = name, "timed out waiting for worker shutdown");
        }
    }
    kafka_publisher.flush();

    info!("👋 Server shutdown complete");
    Ok(())
}

async fn health(
    axum::extract::State(checker): axum::extract::State<HealthChecker>,
) -> Result<Json<HealthReport>, (axum::http::StatusCode, String)> {
    let report = checker.report().await;
    if report.accepts_traffic() {
        Ok(Json(report))
    } else {
        error!("❌ Health check failed - service unavailable");
        Err((
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            "Service Unavailable".to_string(),
        ))
    }
}

/// Readiness probe - checks if the service is ready to accept traffic
async fn readiness(
    state: axum::extract::State<HealthChecker>,
) -> Result<Json<HealthReport>, (axum::http::StatusCode, String)> {
    health(state).await
}

/// Liveness probe - checks if the service is alive (basic check)
async fn liveness() -> &'static str {
    "OK"
}
