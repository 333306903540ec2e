//! Job queue contract and in-memory retryable queue.
//!
//! The queue owns retry scheduling, redelivery, and result retention. Jobs
//! are keyed by their idempotency key: submitting content the queue already
//! tracks reports a duplicate instead of creating a second job. A claimed job
//! is delivered to exactly one executor while in flight; redelivery happens
//! only after an explicit failure or an expired visibility timeout.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backoff::backoff_delay;
use crate::idempotency::idempotency_key;
use crate::model::JobPayload;

/// Retry policy stamped on each submitted job.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Delivery attempts allowed before the job is dead-lettered
    pub max_attempts: u32,

    /// Base delay for the queue's exponential retry backoff
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// A unit of staged work: one raw line, content-addressed and carrying its
/// retry policy.
#[derive(Debug, Clone)]
pub struct Job {
    /// Idempotency key: hex SHA-256 of the raw line bytes
    pub id: String,

    /// Parsed-or-wrapped payload
    pub payload: JobPayload,

    /// Failed delivery attempts so far
    pub attempts: u32,

    /// Delivery attempts allowed before the job is dead-lettered
    pub max_attempts: u32,

    /// Base delay for retry backoff
    pub backoff_base: Duration,
}

impl Job {
    /// Build a job from a raw buffer line. Identical raw bytes always yield
    /// the same job id.
    pub fn from_raw_line(raw: &str, policy: RetryPolicy) -> Self {
        Self {
            id: idempotency_key(raw),
            payload: JobPayload::parse_or_wrap(raw),
            attempts: 0,
            max_attempts: policy.max_attempts,
            backoff_base: policy.base_delay,
        }
    }
}

/// Per-job result of a bulk submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Newly accepted under its idempotency key
    Accepted,

    /// The key is already tracked (queued, in flight, or retained); the
    /// content is represented downstream
    Duplicate,

    /// The queue refused this job
    Rejected(String),
}

/// Outcome of one `submit_bulk` call, in submission order.
#[derive(Debug, Clone, Default)]
pub struct BulkSubmitReport {
    pub outcomes: Vec<SubmitOutcome>,
}

impl BulkSubmitReport {
    /// Number of newly accepted jobs.
    pub fn accepted(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, SubmitOutcome::Accepted))
            .count()
    }

    /// Number of duplicate-key submissions.
    pub fn duplicates(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, SubmitOutcome::Duplicate))
            .count()
    }

    /// Number of rejected jobs.
    pub fn rejected(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, SubmitOutcome::Rejected(_)))
            .count()
    }
}

/// A job leased to exactly one executor.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    /// Lease identifier, required to ack or fail the job
    pub claim_id: String,

    /// The claimed job
    pub job: Job,
}

/// Terminal record for a job that exhausted its attempts.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub job: Job,
    pub reason: String,
    pub dead_at: DateTime<Utc>,
}

/// Errors that can occur during queue operations.
#[derive(Debug)]
pub enum QueueError {
    /// The queue backend could not be reached or refused the call outright
    Unavailable(String),

    /// The claim is unknown: already acked, failed, or expired and redelivered
    UnknownClaim(String),
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueError::Unavailable(msg) => write!(f, "queue unavailable: {}", msg),
            QueueError::UnknownClaim(claim_id) => write!(f, "unknown claim '{}'", claim_id),
        }
    }
}

impl std::error::Error for QueueError {}

/// Durable, retryable, at-least-once delivery queue keyed by idempotency key.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Submit a batch of jobs in one call, reporting a per-job outcome.
    ///
    /// A whole-call error means nothing in the batch should be considered
    /// submitted.
    async fn submit_bulk(&self, jobs: Vec<Job>) -> Result<BulkSubmitReport, QueueError>;

    /// Claim the next ready job, if any. The job stays hidden from other
    /// executors until acked, failed, or its visibility timeout expires.
    async fn claim_next(&self) -> Result<Option<ClaimedJob>, QueueError>;

    /// Acknowledge a claimed job as complete.
    async fn ack(&self, claim: &ClaimedJob) -> Result<(), QueueError>;

    /// Report a claimed job as failed; the queue schedules a retry or
    /// dead-letters it once attempts are exhausted.
    async fn fail(&self, claim: &ClaimedJob, reason: &str) -> Result<(), QueueError>;
}

/// Configuration for the in-memory queue: redelivery and retention bounds.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// How long a claimed job stays hidden before it is eligible for
    /// redelivery
    pub visibility_timeout: Duration,

    /// Ceiling on the retry backoff delay
    pub max_retry_delay: Duration,

    /// Completed job ids retained for duplicate detection
    pub keep_completed: usize,

    /// Dead-lettered jobs retained for inspection
    pub keep_failed: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(60),
            max_retry_delay: Duration::from_secs(30),
            keep_completed: 1_000,
            keep_failed: 5_000,
        }
    }
}

struct InFlightJob {
    job: Job,
    visible_after: Instant,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Job>,
    delayed: Vec<(Instant, Job)>,
    in_flight: HashMap<String, InFlightJob>,
    completed: VecDeque<String>,
    dead: VecDeque<DeadLetter>,
    /// Every job id currently represented in any of the sets above.
    tracked: HashSet<String>,
}

/// In-memory implementation of the full queue contract, for tests and
/// single-process deployments.
pub struct InMemoryJobQueue {
    config: QueueConfig,
    state: Mutex<QueueState>,
}

impl InMemoryJobQueue {
    /// Create a queue with the given configuration.
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Create a queue with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(QueueConfig::default())
    }

    fn locked(&self) -> Result<MutexGuard<'_, QueueState>, QueueError> {
        self.state
            .lock()
            .map_err(|_| QueueError::Unavailable("queue lock poisoned".to_string()))
    }

    /// Jobs waiting to run (ready plus delayed).
    pub fn depth(&self) -> usize {
        self.state
            .lock()
            .map(|s| s.ready.len() + s.delayed.len())
            .unwrap_or(0)
    }

    /// Jobs currently leased to executors.
    pub fn in_flight_len(&self) -> usize {
        self.state.lock().map(|s| s.in_flight.len()).unwrap_or(0)
    }

    /// Completed job ids currently retained.
    pub fn completed_len(&self) -> usize {
        self.state.lock().map(|s| s.completed.len()).unwrap_or(0)
    }

    /// Snapshot of retained dead letters.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state
            .lock()
            .map(|s| s.dead.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether a job id is represented anywhere in the queue.
    pub fn is_tracked(&self, job_id: &str) -> bool {
        self.state
            .lock()
            .map(|s| s.tracked.contains(job_id))
            .unwrap_or(false)
    }

    fn dead_letter(state: &mut QueueState, config: &QueueConfig, job: Job, reason: &str) {
        info!(
            job_id = %job.id,
            attempts = job.attempts,
            reason = reason,
            "job dead-lettered"
        );
        state.dead.push_back(DeadLetter {
            job,
            reason: reason.to_string(),
            dead_at: Utc::now(),
        });
        while state.dead.len() > config.keep_failed {
            if let Some(evicted) = state.dead.pop_front() {
                state.tracked.remove(&evicted.job.id);
            }
        }
    }

    /// Return expired claims to the queue and promote due retries.
    fn reap(state: &mut QueueState, config: &QueueConfig, now: Instant) {
        let expired: Vec<String> = state
            .in_flight
            .iter()
            .filter(|(_, inflight)| now >= inflight.visible_after)
            .map(|(claim_id, _)| claim_id.clone())
            .collect();

        for claim_id in expired {
            if let Some(inflight) = state.in_flight.remove(&claim_id) {
                let mut job = inflight.job;
                job.attempts += 1;
                if job.attempts >= job.max_attempts {
                    Self::dead_letter(state, config, job, "visibility timeout exceeded max attempts");
                } else {
                    warn!(
                        job_id = %job.id,
                        attempts = job.attempts,
                        "claim expired; job returned to queue"
                    );
                    state.ready.push_back(job);
                }
            }
        }

        let mut still_delayed = Vec::new();
        for (ready_at, job) in state.delayed.drain(..) {
            if now >= ready_at {
                state.ready.push_back(job);
            } else {
                still_delayed.push((ready_at, job));
            }
        }
        state.delayed = still_delayed;
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn submit_bulk(&self, jobs: Vec<Job>) -> Result<BulkSubmitReport, QueueError> {
        let mut state = self.locked()?;
        let mut report = BulkSubmitReport::default();

        for job in jobs {
            if state.tracked.contains(&job.id) {
                debug!(job_id = %job.id, "duplicate submission");
                report.outcomes.push(SubmitOutcome::Duplicate);
            } else {
                state.tracked.insert(job.id.clone());
                state.ready.push_back(job);
                report.outcomes.push(SubmitOutcome::Accepted);
            }
        }

        Ok(report)
    }

    async fn claim_next(&self) -> Result<Option<ClaimedJob>, QueueError> {
        let now = Instant::now();
        let mut state = self.locked()?;
        Self::reap(&mut state, &self.config, now);

        let Some(job) = state.ready.pop_front() else {
            return Ok(None);
        };

        let claim_id = Uuid::new_v4().to_string();
        state.in_flight.insert(
            claim_id.clone(),
            InFlightJob {
                job: job.clone(),
                visible_after: now + self.config.visibility_timeout,
            },
        );

        Ok(Some(ClaimedJob { claim_id, job }))
    }

    async fn ack(&self, claim: &ClaimedJob) -> Result<(), QueueError> {
        let mut state = self.locked()?;
        let Some(inflight) = state.in_flight.remove(&claim.claim_id) else {
            return Err(QueueError::UnknownClaim(claim.claim_id.clone()));
        };

        debug!(job_id = %inflight.job.id, "job completed");
        let job_id = inflight.job.id;
        state.completed.push_back(job_id);
        while state.completed.len() > self.config.keep_completed {
            if let Some(evicted) = state.completed.pop_front() {
                state.tracked.remove(&evicted);
            }
        }

        Ok(())
    }

    async fn fail(&self, claim: &ClaimedJob, reason: &str) -> Result<(), QueueError> {
        let now = Instant::now();
        let mut state = self.locked()?;
        let Some(inflight) = state.in_flight.remove(&claim.claim_id) else {
            return Err(QueueError::UnknownClaim(claim.claim_id.clone()));
        };

        let mut job = inflight.job;
        job.attempts += 1;

        if job.attempts >= job.max_attempts {
            Self::dead_letter(&mut state, &self.config, job, reason);
        } else {
            let delay = backoff_delay(
                job.backoff_base,
                job.attempts - 1,
                self.config.max_retry_delay,
            );
            warn!(
                job_id = %job.id,
                attempts = job.attempts,
                max_attempts = job.max_attempts,
                delay_ms = delay.as_millis() as u64,
                reason = reason,
                "job failed; retry scheduled"
            );
            state.delayed.push((now + delay, job));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
        }
    }

    fn quick_queue() -> InMemoryJobQueue {
        InMemoryJobQueue::new(QueueConfig {
            visibility_timeout: Duration::from_millis(40),
            max_retry_delay: Duration::from_millis(100),
            keep_completed: 100,
            keep_failed: 100,
        })
    }

    fn line(app: &str, message: &str) -> String {
        format!(
            r#"{{"app_name":"{}","message":"{}","timestamp":"2024-01-01T00:00:00Z","log_type":"info"}}"#,
            app, message
        )
    }

    #[tokio::test]
    async fn test_submit_reports_duplicates_within_batch() {
        let queue = quick_queue();
        let raw = line("billing", "timeout");
        let jobs = vec![
            Job::from_raw_line(&raw, quick_policy()),
            Job::from_raw_line(&raw, quick_policy()),
        ];

        let report = queue.submit_bulk(jobs).await.unwrap();
        assert_eq!(report.accepted(), 1);
        assert_eq!(report.duplicates(), 1);
        assert_eq!(report.rejected(), 0);
        assert_eq!(queue.depth(), 1);
    }

    #[tokio::test]
    async fn test_submit_reports_duplicates_across_batches() {
        let queue = quick_queue();
        let raw = line("billing", "timeout");

        let first = queue
            .submit_bulk(vec![Job::from_raw_line(&raw, quick_policy())])
            .await
            .unwrap();
        assert_eq!(first.accepted(), 1);

        let second = queue
            .submit_bulk(vec![Job::from_raw_line(&raw, quick_policy())])
            .await
            .unwrap();
        assert_eq!(second.accepted(), 0);
        assert_eq!(second.duplicates(), 1);
    }

    #[tokio::test]
    async fn test_claim_ack_lifecycle() {
        let queue = quick_queue();
        let raw = line("billing", "timeout");
        queue
            .submit_bulk(vec![Job::from_raw_line(&raw, quick_policy())])
            .await
            .unwrap();

        let claim = queue.claim_next().await.unwrap().expect("job available");
        assert_eq!(claim.job.payload.app_name.as_deref(), Some("billing"));

        // The claimed job is hidden from other executors
        assert!(queue.claim_next().await.unwrap().is_none());

        queue.ack(&claim).await.unwrap();
        assert_eq!(queue.in_flight_len(), 0);
        assert_eq!(queue.completed_len(), 1);

        // Completed work is still tracked: a resubmit is a duplicate
        let report = queue
            .submit_bulk(vec![Job::from_raw_line(&raw, quick_policy())])
            .await
            .unwrap();
        assert_eq!(report.duplicates(), 1);
    }

    #[tokio::test]
    async fn test_fail_schedules_delayed_retry() {
        let queue = quick_queue();
        queue
            .submit_bulk(vec![Job::from_raw_line(&line("a", "m"), quick_policy())])
            .await
            .unwrap();

        let claim = queue.claim_next().await.unwrap().unwrap();
        queue.fail(&claim, "resolver unreachable").await.unwrap();

        // Not redelivered before the backoff delay elapses
        assert!(queue.claim_next().await.unwrap().is_none());

        sleep(Duration::from_millis(30)).await;
        let retried = queue.claim_next().await.unwrap().expect("retry due");
        assert_eq!(retried.job.attempts, 1);
    }

    #[tokio::test]
    async fn test_attempts_exhausted_dead_letters() {
        let queue = quick_queue();
        queue
            .submit_bulk(vec![Job::from_raw_line(&line("a", "m"), quick_policy())])
            .await
            .unwrap();

        for attempt in 1u32..=3 {
            sleep(Duration::from_millis(30)).await;
            let claim = queue.claim_next().await.unwrap().expect("job due");
            queue.fail(&claim, "validation failed").await.unwrap();
            assert_eq!(claim.job.attempts, attempt - 1);
        }

        assert_eq!(queue.depth(), 0);
        let dead = queue.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].reason, "validation failed");
        assert_eq!(dead[0].job.attempts, 3);

        // Dead-lettered content is still tracked while retained
        let report = queue
            .submit_bulk(vec![Job::from_raw_line(&line("a", "m"), quick_policy())])
            .await
            .unwrap();
        assert_eq!(report.duplicates(), 1);
    }

    #[tokio::test]
    async fn test_visibility_timeout_redelivers() {
        let queue = quick_queue();
        queue
            .submit_bulk(vec![Job::from_raw_line(&line("a", "m"), quick_policy())])
            .await
            .unwrap();

        let claim = queue.claim_next().await.unwrap().unwrap();

        // Executor goes silent; the claim expires
        sleep(Duration::from_millis(60)).await;
        let redelivered = queue.claim_next().await.unwrap().expect("redelivery");
        assert_eq!(redelivered.job.id, claim.job.id);
        assert_eq!(redelivered.job.attempts, 1);

        // The stale claim can no longer be acked
        let result = queue.ack(&claim).await;
        assert!(matches!(result, Err(QueueError::UnknownClaim(_))));
    }

    #[tokio::test]
    async fn test_completed_retention_is_bounded() {
        let queue = InMemoryJobQueue::new(QueueConfig {
            keep_completed: 2,
            ..QueueConfig::default()
        });

        for i in 0..3 {
            let raw = line("a", &format!("m{}", i));
            queue
                .submit_bulk(vec![Job::from_raw_line(&raw, quick_policy())])
                .await
                .unwrap();
            let claim = queue.claim_next().await.unwrap().unwrap();
            queue.ack(&claim).await.unwrap();
        }

        assert_eq!(queue.completed_len(), 2);

        // The evicted id is no longer tracked, so its content is accepted again
        let report = queue
            .submit_bulk(vec![Job::from_raw_line(&line("a", "m0"), quick_policy())])
            .await
            .unwrap();
        assert_eq!(report.accepted(), 1);
    }

    #[tokio::test]
    async fn test_ack_unknown_claim_errors() {
        let queue = quick_queue();
        let claim = ClaimedJob {
            claim_id: "no-such-claim".to_string(),
            job: Job::from_raw_line(&line("a", "m"), quick_policy()),
        };
        assert!(matches!(
            queue.ack(&claim).await,
            Err(QueueError::UnknownClaim(_))
        ));
    }

    #[test]
    fn test_queue_error_display() {
        assert!(format!("{}", QueueError::Unavailable("down".into())).contains("down"));
        assert!(format!("{}", QueueError::UnknownClaim("c1".into())).contains("c1"));
    }
}
