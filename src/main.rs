//! Log Stager - staging pipeline from shared buffer to durable storage
//!
//! This service drains raw log lines from the shared buffer, stages them as
//! idempotent jobs on a retryable queue, and runs a bounded worker pool that
//! validates, enriches, and persists each record exactly once.
//!
//! ## Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! - `LOG_STAGER_API_URL`: admin API URL (default: http://localhost:8000)
//! - `LOG_STAGER_BATCH_SIZE`: raw lines per drain cycle (default: 100)
//! - `LOG_STAGER_POLL_INTERVAL_SECS`: seconds between drain cycles (default: 5)
//! - `LOG_STAGER_WORKER_CONCURRENCY`: concurrent executors (default: 32)
//! - `LOG_STAGER_MAX_ATTEMPTS`: delivery attempts per job (default: 3)
//! - `LOG_STAGER_SYNTHETIC_PRODUCER`: feed synthetic lines (default: true)
//! - `RUST_LOG`: Logging level filter (default: info)

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use log_stager::buffer::{InMemoryBuffer, SharedBuffer};
use log_stager::config::Config;
use log_stager::drainer::BatchDrainer;
use log_stager::idempotency::InMemoryMarker;
use log_stager::producer::{run_producer, LineProducer};
use log_stager::queue::{InMemoryJobQueue, JobQueue, QueueConfig};
use log_stager::resolver::HttpResolver;
use log_stager::store::{build_http_client, HttpStore};
use log_stager::worker::{Worker, WorkerPool};

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber with environment filter
    init_tracing();

    info!("Starting Log Stager service...");

    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(config) => {
            info!(
                api_url = %config.api_url,
                batch_size = config.batch_size,
                poll_interval_secs = config.poll_interval.as_secs(),
                worker_concurrency = config.worker_concurrency,
                max_attempts = config.max_attempts,
                "Configuration loaded"
            );
            config
        }
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    // Pooled HTTP client shared by the resolver and the store
    let http_client = match build_http_client(&config) {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "Failed to create HTTP client");
            std::process::exit(1);
        }
    };

    let buffer: Arc<dyn SharedBuffer> = Arc::new(InMemoryBuffer::new());
    let queue: Arc<dyn JobQueue> = Arc::new(InMemoryJobQueue::new(QueueConfig {
        keep_completed: config.keep_completed,
        keep_failed: config.keep_failed,
        ..QueueConfig::default()
    }));
    let marker = Arc::new(InMemoryMarker::new());
    let resolver = Arc::new(HttpResolver::new(http_client.clone(), &config.api_url));
    let store = Arc::new(HttpStore::new(http_client, &config.api_url));

    let drainer = BatchDrainer::new(buffer.clone(), queue.clone(), &config);

    // Fail fast if the buffer is unreachable at launch
    match drainer.probe().await {
        Ok(depth) => info!(buffered_lines = depth, "Shared buffer reachable"),
        Err(e) => {
            error!(error = %e, "Shared buffer unreachable at startup");
            std::process::exit(1);
        }
    }

    let worker = Arc::new(Worker::new(
        queue.clone(),
        marker,
        resolver,
        store,
        config.min_message_len,
    ));
    let pool = WorkerPool::new(worker.clone(), config.worker_concurrency);
    let worker_handles = pool.spawn();
    info!(
        concurrency = config.worker_concurrency,
        "Worker pool started"
    );

    let drainer_handle = tokio::spawn(async move {
        info!("Drainer started");
        drainer.run().await;
    });

    let producer_handle = if config.synthetic_producer {
        let producer_buffer = buffer.clone();
        Some(tokio::spawn(async move {
            info!("Synthetic producer started");
            run_producer(LineProducer::with_defaults(), producer_buffer).await;
        }))
    } else {
        None
    };

    // Wait for shutdown signal
    info!("Log Stager running. Press Ctrl+C to stop.");
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Shutdown signal received, stopping...");
        }
        Err(e) => {
            error!(error = %e, "Failed to listen for shutdown signal");
        }
    }

    // The queue redelivers anything in flight after its visibility timeout,
    // so aborting the tasks loses no accepted work
    if let Some(handle) = producer_handle {
        handle.abort();
    }
    drainer_handle.abort();
    for handle in worker_handles {
        handle.abort();
    }

    // Give aborted tasks a moment to unwind before the final report
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stats = worker.stats();
    if stats.transient_failures > 0 || stats.validation_failures > 0 {
        warn!(
            persisted = stats.persisted,
            skipped_duplicates = stats.skipped_duplicates,
            validation_failures = stats.validation_failures,
            transient_failures = stats.transient_failures,
            "Final worker statistics"
        );
    } else {
        info!(
            persisted = stats.persisted,
            skipped_duplicates = stats.skipped_duplicates,
            "Final worker statistics"
        );
    }

    info!("Log Stager stopped");
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}
