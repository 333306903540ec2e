//! Batch drainer: moves raw lines from the shared buffer into the job queue.
//!
//! One drainer instance runs per deployment and is the sole trimmer of the
//! buffer. Lines are trimmed only after the queue has confirmed every job in
//! the batch as accepted or duplicate; a failed hand-off leaves the buffer
//! untouched so the same lines are re-read on the next cycle.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::backoff::CycleBackoff;
use crate::buffer::{BufferError, SharedBuffer};
use crate::config::Config;
use crate::queue::{Job, JobQueue, QueueError, RetryPolicy};

/// Errors that can fail a drain cycle.
#[derive(Debug)]
pub enum DrainError {
    /// Buffer peek or trim failed
    Buffer(BufferError),

    /// The queue could not take the batch
    Queue(QueueError),

    /// The queue refused part of the batch; the buffer stays untrimmed so the
    /// lines are re-submitted next cycle
    PartialSubmit { rejected: usize },
}

impl std::fmt::Display for DrainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DrainError::Buffer(e) => write!(f, "buffer error: {}", e),
            DrainError::Queue(e) => write!(f, "queue error: {}", e),
            DrainError::PartialSubmit { rejected } => {
                write!(f, "queue rejected {} job(s) in the batch", rejected)
            }
        }
    }
}

impl std::error::Error for DrainError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DrainError::Buffer(e) => Some(e),
            DrainError::Queue(e) => Some(e),
            DrainError::PartialSubmit { .. } => None,
        }
    }
}

impl From<BufferError> for DrainError {
    fn from(err: BufferError) -> Self {
        DrainError::Buffer(err)
    }
}

impl From<QueueError> for DrainError {
    fn from(err: QueueError) -> Self {
        DrainError::Queue(err)
    }
}

/// Result of one drain cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainOutcome {
    /// Lines peeked and (on success) trimmed
    pub drained: usize,

    /// Jobs newly accepted by the queue
    pub accepted: usize,

    /// Jobs reported as duplicates of tracked content
    pub duplicates: usize,
}

/// Statistics about drainer operations.
#[derive(Debug, Clone, Default)]
pub struct DrainerStats {
    /// Total drain cycles attempted
    pub cycles: u64,

    /// Cycles that ended in an error
    pub cycle_failures: u64,

    /// Total lines drained (trimmed from the buffer)
    pub lines_drained: u64,

    /// Total jobs newly accepted by the queue
    pub jobs_accepted: u64,

    /// Total duplicate submissions observed
    pub duplicates: u64,
}

/// Polls the shared buffer and stages batches into the job queue.
pub struct BatchDrainer {
    buffer: Arc<dyn SharedBuffer>,
    queue: Arc<dyn JobQueue>,
    batch_size: usize,
    retry_policy: RetryPolicy,
    backoff: CycleBackoff,
    stats: DrainerStats,
}

impl BatchDrainer {
    /// Create a drainer over the given buffer and queue.
    pub fn new(buffer: Arc<dyn SharedBuffer>, queue: Arc<dyn JobQueue>, config: &Config) -> Self {
        Self {
            buffer,
            queue,
            batch_size: config.batch_size,
            retry_policy: RetryPolicy {
                max_attempts: config.max_attempts,
                base_delay: config.retry_base_delay,
            },
            backoff: CycleBackoff::new(config.poll_interval, config.max_poll_interval),
            stats: DrainerStats::default(),
        }
    }

    /// Startup probe: the buffer must be reachable before the loop starts.
    ///
    /// Returns the current buffer depth. A probe failure is process-fatal;
    /// the service fails fast rather than idling silently.
    pub async fn probe(&self) -> Result<usize, DrainError> {
        Ok(self.buffer.len().await?)
    }

    /// Run one drain cycle.
    ///
    /// Peeks up to `batch_size` lines, returning immediately with an empty
    /// outcome when none are available. Each line becomes an idempotent job;
    /// parse failures are wrapped, never fatal to the batch. The buffer is
    /// trimmed by exactly the peeked count only when every per-job outcome is
    /// accepted or duplicate.
    pub async fn drain_once(&mut self) -> Result<DrainOutcome, DrainError> {
        self.stats.cycles += 1;

        let result = self.drain_cycle().await;
        match &result {
            Ok(outcome) => {
                self.stats.lines_drained += outcome.drained as u64;
                self.stats.jobs_accepted += outcome.accepted as u64;
                self.stats.duplicates += outcome.duplicates as u64;
            }
            Err(_) => {
                self.stats.cycle_failures += 1;
            }
        }
        result
    }

    async fn drain_cycle(&mut self) -> Result<DrainOutcome, DrainError> {
        let lines = self.buffer.peek_range(self.batch_size).await?;
        if lines.is_empty() {
            return Ok(DrainOutcome::default());
        }

        let jobs: Vec<Job> = lines
            .iter()
            .map(|line| Job::from_raw_line(line, self.retry_policy))
            .collect();

        let report = self.queue.submit_bulk(jobs).await?;
        let rejected = report.rejected();
        if rejected > 0 {
            warn!(
                batch_size = lines.len(),
                rejected = rejected,
                "queue rejected part of the batch; buffer left untrimmed"
            );
            return Err(DrainError::PartialSubmit { rejected });
        }

        // Duplicate rejections prove the content is already represented
        // downstream, so the lines are safe to trim along with the accepted
        // ones.
        self.buffer.trim_front(lines.len()).await?;

        let outcome = DrainOutcome {
            drained: lines.len(),
            accepted: report.accepted(),
            duplicates: report.duplicates(),
        };
        debug!(
            drained = outcome.drained,
            accepted = outcome.accepted,
            duplicates = outcome.duplicates,
            "batch drained"
        );
        Ok(outcome)
    }

    /// Get current drainer statistics.
    pub fn stats(&self) -> &DrainerStats {
        &self.stats
    }

    /// Run the poll loop until the owning task is aborted.
    ///
    /// An error-free cycle sleeps the base poll interval; a failed cycle
    /// doubles the delay up to the configured ceiling. A cycle error never
    /// stops the loop.
    pub async fn run(mut self) {
        loop {
            match self.drain_once().await {
                Ok(outcome) => {
                    if outcome.drained > 0 {
                        info!(
                            drained = outcome.drained,
                            accepted = outcome.accepted,
                            duplicates = outcome.duplicates,
                            "drain cycle complete"
                        );
                    }
                    self.backoff.record_success();
                }
                Err(e) => {
                    self.backoff.record_failure();
                    warn!(
                        error = %e,
                        consecutive_failures = self.backoff.consecutive_failures(),
                        next_delay_ms = self.backoff.current().as_millis() as u64,
                        "drain cycle failed"
                    );
                }
            }

            tokio::time::sleep(self.backoff.current()).await;
        }
    }
}
