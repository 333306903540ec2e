//! Worker pool: claims staged jobs and persists validated records.
//!
//! Each executor repeatedly claims one job, takes the idempotency claim,
//! resolves the owning application, enriches and validates the record, and
//! writes it to the durable store. Every job resolves to exactly one of:
//! skipped duplicate, enriched-and-persisted, failed-for-retry, or
//! failed-terminal once the queue exhausts its attempts.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use crate::idempotency::{MarkerError, ProcessedMarker};
use crate::model::{EnrichedLogRecord, ValidationError};
use crate::queue::{ClaimedJob, JobQueue};
use crate::resolver::{ReferenceResolver, ResolveError};
use crate::store::{DurableStore, StoreError};

/// How long an idle executor sleeps before polling the queue again.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Terminal result of a successfully handled job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// The record was validated and written to the durable store
    Persisted,

    /// Redelivery of claimed-or-completed work; skipped without side effects
    Skipped,
}

/// Errors that can fail a job's processing pass.
#[derive(Debug)]
pub enum ProcessError {
    /// The marker backend failed
    Marker(MarkerError),

    /// Reference resolution failed; retryable via the queue
    Resolve(ResolveError),

    /// The durable store write failed; retryable via the queue
    Store(StoreError),

    /// The job cannot succeed in its current form. The idempotency claim was
    /// rolled back so a corrected republish of the content is not silently
    /// dropped
    Validation(ValidationError),
}

impl ProcessError {
    /// Validation failures repeat identically on redelivery; everything else
    /// may clear up between attempts.
    pub fn is_transient(&self) -> bool {
        !matches!(self, ProcessError::Validation(_))
    }
}

impl std::fmt::Display for ProcessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessError::Marker(e) => write!(f, "idempotency marker error: {}", e),
            ProcessError::Resolve(e) => write!(f, "reference resolution failed: {}", e),
            ProcessError::Store(e) => write!(f, "store write failed: {}", e),
            ProcessError::Validation(e) => write!(f, "validation failed: {}", e),
        }
    }
}

impl std::error::Error for ProcessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProcessError::Marker(e) => Some(e),
            ProcessError::Resolve(e) => Some(e),
            ProcessError::Store(e) => Some(e),
            ProcessError::Validation(e) => Some(e),
        }
    }
}

impl From<MarkerError> for ProcessError {
    fn from(err: MarkerError) -> Self {
        ProcessError::Marker(err)
    }
}

impl From<ResolveError> for ProcessError {
    fn from(err: ResolveError) -> Self {
        ProcessError::Resolve(err)
    }
}

impl From<StoreError> for ProcessError {
    fn from(err: StoreError) -> Self {
        ProcessError::Store(err)
    }
}

/// Statistics about worker operations, shared across executors.
#[derive(Debug, Clone, Default)]
pub struct WorkerStats {
    /// Records validated and persisted
    pub persisted: u64,

    /// Redeliveries skipped by the idempotency marker
    pub skipped_duplicates: u64,

    /// Jobs that failed validation
    pub validation_failures: u64,

    /// Jobs that failed transiently and were returned for retry
    pub transient_failures: u64,
}

/// Processes claimed jobs against the injected collaborators.
pub struct Worker {
    queue: Arc<dyn JobQueue>,
    marker: Arc<dyn ProcessedMarker>,
    resolver: Arc<dyn ReferenceResolver>,
    store: Arc<dyn DurableStore>,
    min_message_len: usize,
    stats: Mutex<WorkerStats>,
}

impl Worker {
    /// Create a worker over the injected collaborators.
    pub fn new(
        queue: Arc<dyn JobQueue>,
        marker: Arc<dyn ProcessedMarker>,
        resolver: Arc<dyn ReferenceResolver>,
        store: Arc<dyn DurableStore>,
        min_message_len: usize,
    ) -> Self {
        Self {
            queue,
            marker,
            resolver,
            store,
            min_message_len,
            stats: Mutex::new(WorkerStats::default()),
        }
    }

    /// Process one claimed job.
    ///
    /// Steps, all of which must complete or the job goes back to the queue's
    /// retry mechanism: idempotency claim, reference resolution, enrichment,
    /// validation, persistence. The marker is rolled back only on validation
    /// failure; transient failures keep it so a redelivery after a possible
    /// partial write cannot persist twice.
    pub async fn process(&self, claim: &ClaimedJob) -> Result<JobOutcome, ProcessError> {
        let job = &claim.job;

        if !self.marker.insert(&job.id).await? {
            debug!(job_id = %job.id, "duplicate delivery; key already claimed or completed");
            return Ok(JobOutcome::Skipped);
        }

        // Resolution needs a name; a payload without one can never resolve,
        // which is a structural defect of the job, not a transient one.
        let app_name = match job.payload.app_name.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => {
                return Err(self
                    .validation_failure(&job.id, ValidationError::MissingField("app_name"))
                    .await)
            }
        };

        let app_id = self.resolver.resolve(&app_name).await?;

        let record =
            match EnrichedLogRecord::enrich(&job.payload, &app_id, self.min_message_len) {
                Ok(record) => record,
                Err(e) => return Err(self.validation_failure(&job.id, e).await),
            };

        self.store.insert(&record).await?;
        debug!(job_id = %job.id, app_id = %record.app_id, "record enriched and persisted");
        Ok(JobOutcome::Persisted)
    }

    /// Roll the idempotency claim back so corrected content is not silently
    /// dropped, then surface the validation error.
    async fn validation_failure(&self, job_id: &str, err: ValidationError) -> ProcessError {
        if let Err(remove_err) = self.marker.remove(job_id).await {
            warn!(
                job_id = job_id,
                error = %remove_err,
                "failed to roll back idempotency claim"
            );
        }
        ProcessError::Validation(err)
    }

    /// Process a claimed job and settle it with the queue.
    pub async fn handle(&self, claim: &ClaimedJob) {
        match self.process(claim).await {
            Ok(outcome) => {
                self.record_outcome(outcome);
                if let Err(e) = self.queue.ack(claim).await {
                    // The claim may have expired mid-flight; the redelivery
                    // will be skipped by the marker.
                    warn!(job_id = %claim.job.id, error = %e, "failed to ack job");
                }
            }
            Err(e) => {
                self.record_failure(&e);
                warn!(
                    job_id = %claim.job.id,
                    attempts = claim.job.attempts,
                    transient = e.is_transient(),
                    error = %e,
                    "job processing failed"
                );
                if let Err(fail_err) = self.queue.fail(claim, &e.to_string()).await {
                    warn!(job_id = %claim.job.id, error = %fail_err, "failed to report job failure");
                }
            }
        }
    }

    fn record_outcome(&self, outcome: JobOutcome) {
        if let Ok(mut stats) = self.stats.lock() {
            match outcome {
                JobOutcome::Persisted => stats.persisted += 1,
                JobOutcome::Skipped => stats.skipped_duplicates += 1,
            }
        }
    }

    fn record_failure(&self, err: &ProcessError) {
        if let Ok(mut stats) = self.stats.lock() {
            if err.is_transient() {
                stats.transient_failures += 1;
            } else {
                stats.validation_failures += 1;
            }
        }
    }

    /// Get current worker statistics.
    pub fn stats(&self) -> WorkerStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }
}

/// Bounded-concurrency pool of executors over one shared [`Worker`].
pub struct WorkerPool {
    worker: Arc<Worker>,
    concurrency: usize,
}

impl WorkerPool {
    /// Create a pool running `concurrency` executors.
    pub fn new(worker: Arc<Worker>, concurrency: usize) -> Self {
        Self {
            worker,
            concurrency,
        }
    }

    /// Spawn the executor tasks.
    ///
    /// Each task loops: claim the next job, process it, settle with the
    /// queue. An empty queue or a claim error backs off for the idle
    /// interval. Tasks run until aborted.
    pub fn spawn(&self) -> Vec<tokio::task::JoinHandle<()>> {
        (0..self.concurrency)
            .map(|slot| {
                let worker = self.worker.clone();
                tokio::spawn(async move {
                    executor_loop(slot, worker).await;
                })
            })
            .collect()
    }
}

async fn executor_loop(slot: usize, worker: Arc<Worker>) {
    loop {
        match worker.queue().claim_next().await {
            Ok(Some(claim)) => {
                worker.handle(&claim).await;
            }
            Ok(None) => {
                tokio::time::sleep(IDLE_POLL_INTERVAL).await;
            }
            Err(e) => {
                warn!(slot = slot, error = %e, "failed to claim next job");
                tokio::time::sleep(IDLE_POLL_INTERVAL).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{InMemoryBuffer, SharedBuffer};
    use crate::config::Config;
    use crate::drainer::BatchDrainer;
    use crate::idempotency::InMemoryMarker;
    use crate::model::LogType;
    use crate::queue::{InMemoryJobQueue, Job, RetryPolicy};
    use crate::resolver::InMemoryResolver;
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use chrono::Utc;

    struct FailingStore;

    #[async_trait]
    impl DurableStore for FailingStore {
        async fn insert(&self, _record: &EnrichedLogRecord) -> Result<(), StoreError> {
            Err(StoreError::Unreachable("connection refused".to_string()))
        }
    }

    struct Fixture {
        queue: Arc<InMemoryJobQueue>,
        marker: Arc<InMemoryMarker>,
        resolver: Arc<InMemoryResolver>,
        store: Arc<InMemoryStore>,
        worker: Worker,
    }

    fn fixture() -> Fixture {
        let queue = Arc::new(InMemoryJobQueue::with_defaults());
        let marker = Arc::new(InMemoryMarker::new());
        let resolver = Arc::new(InMemoryResolver::new());
        resolver.register("billing", "A1");
        let store = Arc::new(InMemoryStore::new());
        let worker = Worker::new(
            queue.clone(),
            marker.clone(),
            resolver.clone(),
            store.clone(),
            1,
        );
        Fixture {
            queue,
            marker,
            resolver,
            store,
            worker,
        }
    }

    fn billing_line() -> String {
        r#"{"app_name":"billing","message":"timeout","timestamp":"2024-01-01T00:00:00Z","log_type":"error"}"#
            .to_string()
    }

    fn claim_of(raw: &str) -> ClaimedJob {
        ClaimedJob {
            claim_id: "test-claim".to_string(),
            job: Job::from_raw_line(raw, RetryPolicy::default()),
        }
    }

    #[tokio::test]
    async fn test_process_persists_enriched_record() {
        let f = fixture();
        let before = Utc::now();

        let outcome = f.worker.process(&claim_of(&billing_line())).await.unwrap();
        assert_eq!(outcome, JobOutcome::Persisted);

        let records = f.store.records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.app_id, "A1");
        assert_eq!(record.app_name, "billing");
        assert_eq!(record.message, "timeout");
        assert_eq!(record.log_type, LogType::Error);
        assert_eq!(record.timestamp.to_rfc3339(), "2024-01-01T00:00:00+00:00");
        assert!(record.ingested_at >= before);
    }

    #[tokio::test]
    async fn test_redelivery_after_persist_is_skipped() {
        let f = fixture();
        let claim = claim_of(&billing_line());

        assert_eq!(
            f.worker.process(&claim).await.unwrap(),
            JobOutcome::Persisted
        );

        // Queue-level redelivery of the same job: no duplicate store write
        let redelivered = ClaimedJob {
            claim_id: "second-claim".to_string(),
            job: claim.job.clone(),
        };
        assert_eq!(
            f.worker.process(&redelivered).await.unwrap(),
            JobOutcome::Skipped
        );
        assert_eq!(f.store.len(), 1);
    }

    #[tokio::test]
    async fn test_validation_failure_rolls_back_marker() {
        let f = fixture();
        let claim = claim_of("hello world");

        let err = f.worker.process(&claim).await.unwrap_err();
        assert!(matches!(
            err,
            ProcessError::Validation(ValidationError::MissingField("app_name"))
        ));
        assert!(!err.is_transient());

        // A corrected re-submission of the content can proceed
        assert!(!f.marker.contains(&claim.job.id).await.unwrap());
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_log_type_fails_validation() {
        let f = fixture();
        let raw = r#"{"app_name":"billing","message":"timeout","timestamp":"2024-01-01T00:00:00Z","log_type":"verbose"}"#;
        let claim = claim_of(raw);

        let err = f.worker.process(&claim).await.unwrap_err();
        assert!(matches!(err, ProcessError::Validation(_)));
        assert!(!f.marker.contains(&claim.job.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_unresolved_app_is_transient_failure() {
        let f = fixture();
        let raw = r#"{"app_name":"search","message":"slow query","timestamp":"2024-01-01T00:00:00Z","log_type":"warning"}"#;
        let claim = claim_of(raw);

        let err = f.worker.process(&claim).await.unwrap_err();
        assert!(matches!(err, ProcessError::Resolve(ResolveError::NotFound(_))));
        assert!(err.is_transient());

        // The claim is retained: a redelivery of work that may already have
        // progressed must not produce side effects
        assert!(f.marker.contains(&claim.job.id).await.unwrap());
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_keeps_marker() {
        let f = fixture();
        let worker = Worker::new(
            f.queue.clone(),
            f.marker.clone(),
            f.resolver.clone(),
            Arc::new(FailingStore),
            1,
        );
        let claim = claim_of(&billing_line());

        let err = worker.process(&claim).await.unwrap_err();
        assert!(matches!(err, ProcessError::Store(_)));
        assert!(err.is_transient());
        assert!(f.marker.contains(&claim.job.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_handle_settles_with_queue() {
        let f = fixture();
        f.queue
            .submit_bulk(vec![Job::from_raw_line(&billing_line(), RetryPolicy::default())])
            .await
            .unwrap();

        let claim = f.queue.claim_next().await.unwrap().unwrap();
        f.worker.handle(&claim).await;

        assert_eq!(f.queue.in_flight_len(), 0);
        assert_eq!(f.queue.completed_len(), 1);
        assert_eq!(f.worker.stats().persisted, 1);
    }

    #[tokio::test]
    async fn test_handle_returns_failed_job_for_retry() {
        let f = fixture();
        // Wrapped line: fails validation, goes back to the queue's retry
        // mechanism without affecting sibling jobs
        f.queue
            .submit_bulk(vec![
                Job::from_raw_line("hello world", RetryPolicy::default()),
                Job::from_raw_line(&billing_line(), RetryPolicy::default()),
            ])
            .await
            .unwrap();

        let first = f.queue.claim_next().await.unwrap().unwrap();
        f.worker.handle(&first).await;
        let second = f.queue.claim_next().await.unwrap().unwrap();
        f.worker.handle(&second).await;

        // The sibling persisted; the malformed job is scheduled for retry
        assert_eq!(f.store.len(), 1);
        assert_eq!(f.queue.depth(), 1);
        let stats = f.worker.stats();
        assert_eq!(stats.persisted, 1);
        assert_eq!(stats.validation_failures, 1);
    }

    #[tokio::test]
    async fn test_idempotency_across_repeated_submissions() {
        // The same raw bytes submitted many times yield exactly one record
        let f = fixture();
        let raw = billing_line();

        for i in 0..5 {
            let claim = ClaimedJob {
                claim_id: format!("claim-{}", i),
                job: Job::from_raw_line(&raw, RetryPolicy::default()),
            };
            let _ = f.worker.process(&claim).await;
        }

        assert_eq!(f.store.len(), 1);
    }

    #[tokio::test]
    async fn test_full_pipeline_drain_and_process() {
        // Buffer -> drainer -> queue -> worker -> store, end to end
        let f = fixture();
        let buffer = Arc::new(InMemoryBuffer::new());
        buffer.push(billing_line()).await.unwrap();
        buffer.push("hello world".to_string()).await.unwrap();
        buffer.push(billing_line()).await.unwrap(); // duplicate content

        let config = Config::default();
        let mut drainer = BatchDrainer::new(buffer.clone(), f.queue.clone(), &config);
        let outcome = drainer.drain_once().await.unwrap();
        assert_eq!(outcome.drained, 3);
        assert_eq!(outcome.accepted, 2);
        assert_eq!(outcome.duplicates, 1);
        assert_eq!(buffer.len().await.unwrap(), 0);

        while let Some(claim) = f.queue.claim_next().await.unwrap() {
            f.worker.handle(&claim).await;
        }

        // One valid record persisted; the wrapped line awaits its retry
        assert_eq!(f.store.len(), 1);
        assert_eq!(f.store.records()[0].app_id, "A1");
        assert_eq!(f.queue.depth(), 1);
    }

    #[tokio::test]
    async fn test_worker_pool_processes_queue() {
        let f = fixture();
        let worker = Arc::new(Worker::new(
            f.queue.clone(),
            f.marker.clone(),
            f.resolver.clone(),
            f.store.clone(),
            1,
        ));

        f.queue
            .submit_bulk(vec![Job::from_raw_line(&billing_line(), RetryPolicy::default())])
            .await
            .unwrap();

        let pool = WorkerPool::new(worker, 4);
        let handles = pool.spawn();
        assert_eq!(handles.len(), 4);

        // Give the executors time to drain the queue
        for _ in 0..50 {
            if f.store.len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(f.store.len(), 1);

        for handle in handles {
            handle.abort();
        }
    }

    #[test]
    fn test_process_error_display() {
        let err = ProcessError::Validation(ValidationError::MissingField("app_name"));
        assert!(format!("{}", err).contains("app_name"));

        let err = ProcessError::Resolve(ResolveError::NotFound("billing".to_string()));
        assert!(format!("{}", err).contains("billing"));
    }
}
