//! Order Broker - Kafka to `PostgreSQL` order ingestion with a cached lookup API.
//!
//! # Startup
//!
//! 1. Load configuration, initialize Sentry and tracing
//! 2. Connect to `PostgreSQL` and ping it (fail fast)
//! 3. Load every stored order into the cache (fail fast)
//! 4. Assign the Kafka partition and spawn the intake consumer
//! 5. Serve HTTP lookups until SIGINT/SIGTERM
//!
//! # Shutdown
//!
//! A shutdown signal cancels a shared token. The server stops accepting
//! connections and drains in-flight requests; the consumer finishes the
//! message it is processing and returns. Both are awaited up to the configured
//! drain bound.

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::sync::Arc;
use std::time::Duration;

use order_broker::bootstrap;
use order_broker::cache::OrderCache;
use order_broker::config::BrokerConfig;
use order_broker::db::{self, OrderRepository, OrderStore};
use order_broker::intake::IntakeConsumer;
use order_broker::routes;
use order_broker::state::AppState;
use order_broker::stream::KafkaStream;
use sentry::integrations::tracing as sentry_tracing;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Bound on the startup connectivity check.
const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &BrokerConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            sample_rate: config.sentry_sample_rate,
            traces_sample_rate: config.sentry_traces_sample_rate,
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

/// Initialize tracing with `EnvFilter`, text or JSON output, and Sentry.
fn init_tracing(log_json: bool) {
    // Defaults to info level for our crate if RUST_LOG is not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "order_broker=info,tower_http=debug".into());

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(sentry_tracing::layer().event_filter(sentry_event_filter));

    if log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Log a fatal startup error and exit non-zero.
///
/// The Sentry guard is dropped first so the event is flushed.
fn fail_startup(
    guard: Option<sentry::ClientInitGuard>,
    message: &str,
    error: &dyn std::fmt::Display,
) -> ! {
    tracing::error!(error = %error, "{message}");
    drop(guard);
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    // Load configuration from environment (needed for Sentry init)
    let config = BrokerConfig::from_env().expect("Failed to load configuration");

    // Initialize Sentry (must be done before tracing subscriber)
    let sentry_guard = init_sentry(&config);
    init_tracing(config.log_json);

    // Initialize database connection pool
    let pool = match db::create_pool(&config.database_url).await {
        Ok(pool) => pool,
        Err(e) => fail_startup(sentry_guard, "Failed to create database pool", &e),
    };
    let store: Arc<dyn OrderStore> = Arc::new(OrderRepository::new(pool));

    match tokio::time::timeout(PING_TIMEOUT, store.ping()).await {
        Ok(Ok(())) => tracing::info!("Connected to database"),
        Ok(Err(e)) => fail_startup(sentry_guard, "Database ping failed", &e),
        Err(_) => fail_startup(sentry_guard, "Database ping timed out", &"no response within 5s"),
    }

    // NOTE: Migrations are NOT run automatically on startup.
    // Run them explicitly via: cargo run -p order-broker-cli -- migrate

    // Warm the cache before any consumer or query traffic
    let cache = OrderCache::new();
    if let Err(e) = bootstrap::warm_cache(store.as_ref(), &cache, config.bootstrap_timeout).await {
        fail_startup(sentry_guard, "Failed to load cache from store", &e);
    }

    let stream = match KafkaStream::connect(&config.kafka) {
        Ok(stream) => stream,
        Err(e) => fail_startup(sentry_guard, "Failed to connect to Kafka", &e),
    };

    let shutdown = CancellationToken::new();

    let consumer = IntakeConsumer::new(
        stream,
        Arc::clone(&store),
        cache.clone(),
        config.intake.clone(),
    );
    let consumer_task = tokio::spawn(consumer.run(shutdown.child_token()));

    // Build router
    let state = AppState::new(store, cache, config.query_timeout);
    let app = routes::app(state)
        // Sentry layers (outermost for full request coverage)
        .layer(sentry_tower::NewSentryLayer::new_from_top())
        .layer(sentry_tower::SentryHttpLayer::new().enable_transaction());

    // Start server
    let addr = config.socket_addr();
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => fail_startup(sentry_guard, "Failed to bind to address", &e),
    };
    tracing::info!("order-broker listening on {}", addr);

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    // The server exiting on its own also stops the consumer.
    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(server_shutdown.clone().cancelled_owned())
            .await;
        server_shutdown.cancel();
        result
    });

    shutdown.cancelled().await;

    let drained = tokio::time::timeout(config.shutdown_drain, async {
        if let Ok(Err(e)) = server.await {
            tracing::error!(error = %e, "Server error");
        }
        if let Err(e) = consumer_task.await {
            tracing::error!(error = %e, "Intake consumer task failed");
        }
    })
    .await;

    if drained.is_err() {
        tracing::warn!(
            drain = ?config.shutdown_drain,
            "Shutdown drain timed out, exiting with work in flight"
        );
    }

    tracing::info!("Shutdown complete");
    drop(sentry_guard);
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
