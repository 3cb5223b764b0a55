use anyhow::Context;
use edumart_api::state::{AppState, Repositories};
use edumart_api::{app, worker};
use edumart_catalog::{CatalogClient, HttpCatalogClient, InMemoryCatalog};
use edumart_core::clock::{Clock, SystemClock};
use edumart_core::events::{BroadcastPublisher, EventPublisher};
use edumart_core::retry::RetryConfig;
use edumart_order::InMemoryStore;
use edumart_store::{Config, DbClient, RedisClient};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "edumart_api=debug,edumart_order=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting EduMart sale engine on port {} ({} mode)", config.server.port, config.run_mode);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let repos = if config.in_memory() {
        tracing::warn!("RUN_MODE=memory: orders, payments and wallets live in process memory");
        Repositories::in_memory(Arc::new(InMemoryStore::new(clock.clone())))
    } else {
        let db = DbClient::new(&config.database.url, config.database.max_connections)
            .await
            .context("Failed to connect to Postgres")?;
        db.migrate().await.context("Failed to run migrations")?;
        Repositories::postgres(&db)
    };

    // Redis Connection
    let redis = match config.redis.as_ref() {
        Some(redis) if !config.in_memory() => Some(Arc::new(
            RedisClient::new(&redis.url).await.context("Failed to connect to Redis")?,
        )),
        _ => {
            tracing::info!("Redis not configured; rate limiting and worker leases are off");
            None
        }
    };

    let catalog: Arc<dyn CatalogClient> = match config.catalog.base_url.as_deref() {
        Some(base_url) => Arc::new(
            HttpCatalogClient::new(base_url, Duration::from_millis(config.catalog.timeout_ms))?
                .with_retry(RetryConfig::default()),
        ),
        None => {
            tracing::warn!("catalog.base_url is unset; using an empty in-process catalog");
            Arc::new(InMemoryCatalog::new())
        }
    };

    let publisher = event_publisher(&config)?;

    let state = AppState::build(&config, repos, catalog, publisher, clock, redis)?;

    tokio::spawn(worker::start_settlement_worker(
        state.clone(),
        Duration::from_secs(config.settlement.sweep_interval_seconds),
    ));
    tokio::spawn(worker::start_payment_expiry_worker(
        state.clone(),
        Duration::from_secs(config.workers.payment_expiry_interval_seconds),
    ));

    let app = app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}

#[cfg(feature = "kafka")]
fn event_publisher(config: &Config) -> anyhow::Result<Arc<dyn EventPublisher>> {
    match config.kafka.as_ref() {
        Some(kafka) if !config.in_memory() => {
            let producer = edumart_store::EventProducer::new(&kafka.brokers).context("Failed to create Kafka producer")?;
            Ok(Arc::new(producer))
        }
        _ => Ok(Arc::new(BroadcastPublisher::default())),
    }
}

#[cfg(not(feature = "kafka"))]
fn event_publisher(config: &Config) -> anyhow::Result<Arc<dyn EventPublisher>> {
    if config.kafka.is_some() {
        tracing::warn!("kafka is configured but this build lacks the `kafka` feature; events stay in process");
    }
    Ok(Arc::new(BroadcastPublisher::default()))
}
