use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::decompression::RequestDecompressionLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::info;

use super::services::{
    cancel_job, create_job, delete_media, download_media, health, job_status, list_jobs,
    media_info,
};
use super::state::AppState;
use crate::config::{Config, CorsConfig};
use crate::jobs::JobService;
use crate::ledger::LedgerStore;
use crate::observability::Metrics;
use crate::provider::{MediaSynthesizer, ProviderClient};
use crate::queue::{TaskBroker, TaskQueue};
use crate::storage::StorageClient;
use crate::worker::{self, ArtifactFetcher, FetchConfig, RunnerContext, WebhookNotifier};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub async fn run(address: Option<SocketAddr>, config_path: Option<PathBuf>) -> Result<(), AnyError> {
    info!("Loading configuration");
    let config = match config_path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
    .map_err(|e| format!("Failed to load config: {e}"))?;

    let bind_addr = address.unwrap_or(config.server.bind_addr);

    info!(path = %config.server.ledger_path.display(), "Opening ledger");
    let ledger = Arc::new(
        LedgerStore::open(&config.server.ledger_path)
            .map_err(|e| format!("Failed to open ledger: {e}"))?,
    );

    let queue_path = config
        .server
        .ledger_path
        .parent()
        .map(|parent| parent.join("queue"))
        .unwrap_or_else(|| PathBuf::from("data/queue"));
    info!(path = %queue_path.display(), "Opening task queue");
    let queue = Arc::new(
        TaskQueue::open(&queue_path).map_err(|e| format!("Failed to open task queue: {e}"))?,
    );

    // Prefetch of one: a worker channel never buffers a second task
    let (broker, generation_rxs, maintenance_rx) =
        TaskBroker::new(queue, config.queue.workers, 1);
    let broker = Arc::new(broker);

    let storage = StorageClient::from_config(&config.storage)
        .map_err(|e| format!("Failed to initialize storage: {e}"))?;

    let provider: Arc<dyn MediaSynthesizer> =
        Arc::new(ProviderClient::from_config(&config.provider, config.app.env));

    let jobs = JobService::new(
        Arc::clone(&ledger),
        Arc::clone(&broker),
        config.retry.max_retries,
    );
    let metrics = Arc::new(Metrics::new());

    let runner_ctx = Arc::new(RunnerContext {
        jobs: jobs.clone(),
        ledger: Arc::clone(&ledger),
        storage: storage.clone(),
        provider,
        fetcher: ArtifactFetcher::new(FetchConfig::default()),
        webhooks: WebhookNotifier::new(),
        model: config.provider.model.clone(),
        provider_timeout: Duration::from_secs(config.provider.timeout_secs),
        retry: config.retry.clone(),
        metrics: Arc::clone(&metrics),
    });

    worker::spawn_generation_workers(runner_ctx, Arc::clone(&broker), generation_rxs);
    worker::spawn_maintenance_worker(
        jobs.clone(),
        Arc::clone(&broker),
        maintenance_rx,
        config.retention.job_ttl_days,
    );
    worker::spawn_cleanup_scheduler(
        Arc::clone(&broker),
        Duration::from_secs(config.queue.cleanup_interval_secs),
    );

    // Tasks stranded by a previous crash go back out before we accept traffic
    broker
        .redeliver_pending()
        .await
        .map_err(|e| format!("Failed to redeliver pending tasks: {e}"))?;

    let cors = cors_layer(&config.cors);
    let state = AppState::new(config, jobs, ledger, storage, broker, metrics);
    let app = router(state).layer(cors);

    let listener = TcpListener::bind(bind_addr).await?;
    info!(%bind_addr, "MediaBox API listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Build the application router
///
/// Shared with the test suites so they exercise the exact production routes
/// and middleware.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/jobs/generate", post(create_job))
        .route("/jobs", get(list_jobs))
        .route("/jobs/status/{job_id}", get(job_status))
        .route("/jobs/{job_id}", delete(cancel_job))
        .route("/media/{media_id}", get(download_media).delete(delete_media))
        .route("/media/{media_id}/info", get(media_info))
        .route("/health", get(health))
        .with_state(state)
        .layer(middleware::from_fn(record_process_time))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        // Automatically decompress gzip/deflate/brotli request bodies
        .layer(RequestDecompressionLayer::new())
}

fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if config.allowed_origins.iter().any(|origin| origin == "*") {
        layer.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        layer.allow_origin(origins)
    }
}

/// Stamp X-Process-Time (seconds) on every response
async fn record_process_time(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let mut response = next.run(request).await;

    let elapsed = format!("{:.6}", start.elapsed().as_secs_f64());
    if let Ok(value) = HeaderValue::from_str(&elapsed) {
        response.headers_mut().insert("x-process-time", value);
    }
    response
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())
            .expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
