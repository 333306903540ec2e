//! Log Stager Library
//!
//! This library implements a log-ingestion staging pipeline: it moves raw
//! log lines produced by many client applications into durable storage,
//! decoupling bursty producers from a slower validated-write consumer.
//!
//! - **config**: Environment-based configuration for the pipeline
//! - **model**: Raw-line parsing, validation, and the enriched record schema
//! - **idempotency**: Content-addressed job keys and the processed marker
//! - **backoff**: Retry and cycle backoff utilities
//! - **buffer**: Shared buffer contract between producers and the drainer
//! - **queue**: Retryable job queue keyed by idempotency key
//! - **resolver**: Application name-to-id resolution
//! - **store**: Durable record store
//! - **drainer**: Batch drainer polling the buffer into the queue
//! - **worker**: Bounded-concurrency pool persisting validated records
//! - **producer**: Synthetic line producer for local runs
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use log_stager::buffer::{InMemoryBuffer, SharedBuffer};
//! use log_stager::config::Config;
//! use log_stager::drainer::BatchDrainer;
//! use log_stager::idempotency::InMemoryMarker;
//! use log_stager::queue::{InMemoryJobQueue, JobQueue};
//! use log_stager::resolver::InMemoryResolver;
//! use log_stager::store::InMemoryStore;
//! use log_stager::worker::{Worker, WorkerPool};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::default();
//!
//!     let buffer: Arc<dyn SharedBuffer> = Arc::new(InMemoryBuffer::new());
//!     let queue: Arc<dyn JobQueue> = Arc::new(InMemoryJobQueue::with_defaults());
//!     let resolver = Arc::new(InMemoryResolver::new());
//!     resolver.register("billing", "A1");
//!
//!     buffer
//!         .push(r#"{"app_name":"billing","message":"timeout","timestamp":"2024-01-01T00:00:00Z","log_type":"error"}"#.to_string())
//!         .await
//!         .unwrap();
//!
//!     let mut drainer = BatchDrainer::new(buffer, queue.clone(), &config);
//!     drainer.drain_once().await.unwrap();
//!
//!     let worker = Arc::new(Worker::new(
//!         queue,
//!         Arc::new(InMemoryMarker::new()),
//!         resolver,
//!         Arc::new(InMemoryStore::new()),
//!         config.min_message_len,
//!     ));
//!     let _handles = WorkerPool::new(worker, config.worker_concurrency).spawn();
//! }
//! ```

// Module declarations
pub mod backoff;
pub mod buffer;
pub mod config;
pub mod drainer;
pub mod idempotency;
pub mod model;
pub mod producer;
pub mod queue;
pub mod resolver;
pub mod store;
pub mod worker;

// Re-export commonly used types at crate root for convenience
pub use backoff::CycleBackoff;
pub use buffer::{BufferError, InMemoryBuffer, SharedBuffer};
pub use config::{Config, ConfigError};
pub use drainer::{BatchDrainer, DrainError, DrainOutcome, DrainerStats};
pub use idempotency::{idempotency_key, InMemoryMarker, MarkerError, ProcessedMarker};
pub use model::{EnrichedLogRecord, JobPayload, LogType, ValidationError};
pub use producer::{LineProducer, ProducerConfig};
pub use queue::{
    BulkSubmitReport, ClaimedJob, InMemoryJobQueue, Job, JobQueue, QueueConfig, QueueError,
    RetryPolicy, SubmitOutcome,
};
pub use resolver::{HttpResolver, InMemoryResolver, ReferenceResolver, ResolveError};
pub use store::{build_http_client, DurableStore, HttpStore, InMemoryStore, StoreError};
pub use worker::{JobOutcome, ProcessError, Worker, WorkerPool, WorkerStats};
