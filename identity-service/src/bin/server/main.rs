use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use auth::Authenticator;
use identity_service::config::Config;
use identity_service::domain::identity::service::IdentityService;
use identity_service::domain::identity::tokens::TokenAuthority;
use identity_service::inbound::http::rate_limit::ClientRateLimiter;
use identity_service::inbound::http::rate_limit::SWEEP_INTERVAL;
use identity_service::inbound::http::router::create_router;
use identity_service::outbound::cache::InMemorySessionCache;
use identity_service::outbound::events::KafkaEventProducer;
use identity_service::outbound::repositories::PostgresIdentityStore;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "identity_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        service = "identity-service",
        version = env!("CARGO_PKG_VERSION"),
        "Service starting"
    );

    let config = Config::load()?;

    tracing::info!(
        http_port = config.server.http_port,
        kafka_brokers = %config.kafka.brokers,
        kafka_topic = %config.kafka.topic,
        rate_limit_enabled = config.rate_limit.enabled,
        operation_timeout_ms = config.timeouts.operation_ms,
        "Configuration loaded"
    );

    let pg_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(Duration::from_secs(config.database.acquire_timeout_secs))
        .connect(&config.database.url)
        .await?;
    tracing::info!(
        max_connections = config.database.max_connections,
        database = "postgresql",
        "Database connection pool created"
    );

    sqlx::migrate!("./migrations").run(&pg_pool).await?;
    tracing::info!(database = "postgresql", "Database migrations completed");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let identity_store = Arc::new(PostgresIdentityStore::new(pg_pool));
    let event_producer = Arc::new(KafkaEventProducer::new(&config.kafka)?);

    let session_cache = Arc::new(InMemorySessionCache::new());
    let cache_sweeper = Arc::clone(&session_cache)
        .spawn_sweeper(config.cache.sweep_interval(), shutdown_rx.clone());

    let identity_service = IdentityService::new(identity_store, event_producer, session_cache)
        .with_authenticator(Authenticator::with_policy(config.password.policy())?)
        .with_token_authority(TokenAuthority::new(config.tokens.lifetimes()))
        .with_operation_timeout(config.timeouts.operation());

    let (rate_limiter, limiter_sweeper) = if config.rate_limit.enabled {
        let limiter = Arc::new(ClientRateLimiter::new(&config.rate_limit));
        let sweeper = Arc::clone(&limiter).spawn_sweeper(SWEEP_INTERVAL, shutdown_rx.clone());
        (Some(limiter), Some(sweeper))
    } else {
        tracing::warn!("Rate limiting disabled");
        (None, None)
    };

    let http_application = create_router(
        Arc::new(identity_service),
        rate_limiter,
        config.server.trust_forwarded_for,
        &config.cors.trusted_origins,
    );

    let http_address = format!("0.0.0.0:{}", config.server.http_port);
    let http_listener = tokio::net::TcpListener::bind(&http_address).await?;
    tracing::info!(
        address = %http_address,
        port = config.server.http_port,
        protocol = "http",
        "Http server listening"
    );

    axum::serve(
        http_listener,
        http_application.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Http server stopped, stopping background tasks");
    let _ = shutdown_tx.send(true);
    let _ = cache_sweeper.await;
    if let Some(sweeper) = limiter_sweeper {
        let _ = sweeper.await;
    }

    tracing::info!("Service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received");
}
