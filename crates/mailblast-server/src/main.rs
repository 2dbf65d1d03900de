//! MailBlast - Dispatch server entry point

use anyhow::Result;
use mailblast_api::{create_router, AppState, HttpIdentityProvider};
use mailblast_common::config::{Config, LoggingConfig};
use mailblast_core::{
    DispatchEngine, DispatchMetrics, DispatchScheduler, InputLoader, LettreDeliveryClient,
    ScheduleWorker, StorageAttachmentSource, TemplateRenderer,
};
use mailblast_storage::{
    BlobStore, DatabasePool, DbContactRepository, DbDeliveryHistoryRepository,
    DbScheduleRepository, DbSettingsRepository, DbTemplateRepository, DeliveryHistoryRepository,
    LocalBlobStore, ScheduleRepository,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// How long active runs get to wind down after a shutdown signal
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    init_logging(&config.logging);

    info!("Starting MailBlast dispatch server...");

    // Initialize database
    let db_pool = DatabasePool::new(&config.database).await?;
    info!("Database connection established");

    // Run migrations
    db_pool.migrate().await?;

    // Initialize blob storage
    let blobs: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new(&config.storage)?);

    // Table store repositories
    let history: Arc<dyn DeliveryHistoryRepository> =
        Arc::new(DbDeliveryHistoryRepository::new(db_pool.clone()));
    let schedules: Arc<dyn ScheduleRepository> = Arc::new(DbScheduleRepository::new(db_pool.clone()));
    let inputs = Arc::new(InputLoader::new(
        Arc::new(DbContactRepository::new(db_pool.clone())),
        Arc::new(DbTemplateRepository::new(db_pool.clone())),
        Arc::new(DbSettingsRepository::new(db_pool.clone())),
    ));

    // Dispatch engine
    let metrics = Arc::new(DispatchMetrics::new()?);
    let client = Arc::new(LettreDeliveryClient::new(
        &config.dispatch,
        &config.server.hostname,
    ));
    let scheduler = Arc::new(
        DispatchScheduler::new(client, config.dispatch.max_jobs_per_run).with_metrics(metrics.clone()),
    );
    let attachments = Arc::new(StorageAttachmentSource::new(&config.storage, Some(blobs))?);
    let engine = Arc::new(
        DispatchEngine::new(scheduler, attachments, config.dispatch.clone())
            .with_history(history.clone())
            .with_metrics(metrics.clone()),
    );

    let shutdown = CancellationToken::new();

    // Start schedule worker
    let worker_handle = {
        let worker = ScheduleWorker::new(engine.clone(), schedules.clone(), inputs.clone())
            .with_poll_interval(config.dispatch.schedule_poll_secs);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            worker.run(shutdown).await;
        })
    };

    // Start API server
    let state = AppState {
        engine: engine.clone(),
        inputs,
        history,
        schedules,
        identity: Arc::new(HttpIdentityProvider::new(&config.identity)?),
        renderer: TemplateRenderer::new(),
        metrics: Some(metrics),
        db_pool: Some(db_pool.clone()),
    };
    let app = create_router(state, &config.api.cors_origins);

    let addr = format!("{}:{}", config.server.bind_address, config.api.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Starting API server on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone(), engine.clone()))
        .await?;

    // Stop the worker first so no scheduled run starts after the drain
    if let Err(e) = worker_handle.await {
        warn!("Schedule worker task failed: {}", e);
    }
    // Let cancelled runs emit their outcomes and flush history
    let unfinished = engine.runs().drain(DRAIN_TIMEOUT).await;
    if !unfinished.is_empty() {
        warn!("{} runs were still active at shutdown", unfinished.len());
    }
    db_pool.close().await;

    info!("MailBlast server shutdown complete");

    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken, engine: Arc<DispatchEngine>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");

    shutdown.cancel();
    let cancelled = engine.runs().cancel_all();
    if cancelled > 0 {
        info!("Cancelled {} active runs", cancelled);
    }
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},mailblast=debug", config.level)));

    let registry = tracing_subscriber::registry().with(filter);
    if config.format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_target(true).with_level(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
