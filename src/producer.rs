//! Synthetic raw-line producer for local runs.
//!
//! Emits JSON log lines for a rotating set of application names, with a
//! configurable fraction of malformed plain-text lines to exercise the
//! wrap-and-reject path. Production deployments receive lines from real
//! client applications instead; the buffer is multi-producer either way.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use tracing::{info, warn};

use crate::buffer::SharedBuffer;
use crate::model::LogType;

/// Default delay between produced lines in milliseconds.
const DEFAULT_PRODUCE_INTERVAL_MS: u64 = 50;

/// Configuration for the synthetic producer.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Application names to attribute lines to
    pub app_names: Vec<String>,

    /// Fraction (0.0 - 1.0) of lines emitted as malformed plain text
    pub malformed_rate: f64,

    /// Delay between produced lines
    pub interval: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            app_names: vec![
                "billing".to_string(),
                "checkout".to_string(),
                "auth".to_string(),
                "search".to_string(),
                "notifications".to_string(),
            ],
            malformed_rate: 0.05, // 5% malformed lines
            interval: Duration::from_millis(DEFAULT_PRODUCE_INTERVAL_MS),
        }
    }
}

/// Generates raw log lines in the shape real client applications emit.
///
/// Log types are weighted towards info, with occasional warnings and errors.
pub struct LineProducer {
    config: ProducerConfig,
    type_weights: WeightedIndex<u32>,
}

impl LineProducer {
    /// Create a new producer with the given configuration.
    pub fn new(config: ProducerConfig) -> Self {
        // Weight log types: Debug 15%, Info 60%, Warning 15%, Error 8%, Critical 2%
        let weights = vec![15, 60, 15, 8, 2];
        let type_weights = WeightedIndex::new(&weights).expect("Invalid weights");

        Self {
            config,
            type_weights,
        }
    }

    /// Create a new producer with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ProducerConfig::default())
    }

    /// Generate a single raw line.
    pub fn generate(&self) -> String {
        let mut rng = rand::thread_rng();

        if rng.gen_bool(self.config.malformed_rate) {
            return self.generate_malformed(&mut rng);
        }

        let app_name = &self.config.app_names[rng.gen_range(0..self.config.app_names.len())];
        let log_type = LogType::all()[self.type_weights.sample(&mut rng)];
        let message = self.generate_message(&mut rng, app_name, log_type);

        serde_json::json!({
            "app_name": app_name,
            "message": message,
            "timestamp": Utc::now().to_rfc3339(),
            "log_type": log_type,
        })
        .to_string()
    }

    /// Generate multiple raw lines.
    pub fn generate_batch(&self, count: usize) -> Vec<String> {
        (0..count).map(|_| self.generate()).collect()
    }

    fn generate_message(&self, rng: &mut impl Rng, app_name: &str, log_type: LogType) -> String {
        let latency_ms = rng.gen_range(1..=2_000);
        let request_id = rng.gen_range(100_000..=999_999);

        match log_type {
            LogType::Debug => {
                format!("request {} traced through {} in {}ms", request_id, app_name, latency_ms)
            }
            LogType::Info => {
                format!("request {} completed in {}ms", request_id, latency_ms)
            }
            LogType::Warning => {
                format!("request {} slow: {}ms above budget", request_id, latency_ms)
            }
            LogType::Error => {
                format!("request {} failed: upstream timeout after {}ms", request_id, latency_ms)
            }
            LogType::Critical => {
                format!("{} unavailable: {} consecutive failures", app_name, rng.gen_range(3..=20))
            }
        }
    }

    fn generate_malformed(&self, rng: &mut impl Rng) -> String {
        let fragments = [
            "heartbeat ok",
            "panic: connection reset by peer",
            "<<<truncated frame",
            "warn   legacy agent line without structure",
        ];
        fragments[rng.gen_range(0..fragments.len())].to_string()
    }
}

/// Run the producer task, pushing lines into the shared buffer until the
/// owning task is aborted.
///
/// A full buffer drops the produced line on the producer side and logs it;
/// buffered lines are never displaced underneath the drainer.
pub async fn run_producer(producer: LineProducer, buffer: Arc<dyn SharedBuffer>) {
    let mut ticker = tokio::time::interval(producer.config.interval);
    // Skip the first immediate tick
    ticker.tick().await;

    let mut lines_produced: u64 = 0;
    let mut lines_dropped: u64 = 0;
    let mut last_report_time = std::time::Instant::now();
    let report_interval = Duration::from_secs(30);

    loop {
        ticker.tick().await;

        let line = producer.generate();
        match buffer.push(line).await {
            Ok(()) => {
                lines_produced += 1;
            }
            Err(e) => {
                lines_dropped += 1;
                warn!(error = %e, "buffer rejected produced line");
            }
        }

        if last_report_time.elapsed() >= report_interval {
            info!(
                lines_produced = lines_produced,
                lines_dropped = lines_dropped,
                rate = format!(
                    "{:.1}/s",
                    lines_produced as f64 / last_report_time.elapsed().as_secs_f64()
                ),
                "Producer progress"
            );
            lines_produced = 0;
            lines_dropped = 0;
            last_report_time = std::time::Instant::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::JobPayload;

    #[test]
    fn test_generate_structured_line_parses() {
        let config = ProducerConfig {
            malformed_rate: 0.0,
            ..ProducerConfig::default()
        };
        let producer = LineProducer::new(config);

        for line in producer.generate_batch(50) {
            let payload = JobPayload::parse_or_wrap(&line);
            assert!(payload.app_name.is_some(), "line should be structured: {}", line);
            assert!(payload.timestamp.is_some());
            assert!(payload.log_type.is_some());
            assert!(!payload.message.is_empty());
        }
    }

    #[test]
    fn test_generate_log_types_are_valid() {
        let config = ProducerConfig {
            malformed_rate: 0.0,
            ..ProducerConfig::default()
        };
        let producer = LineProducer::new(config);

        for line in producer.generate_batch(50) {
            let payload = JobPayload::parse_or_wrap(&line);
            let log_type = payload.log_type.expect("structured line");
            assert!(LogType::parse(&log_type).is_some(), "bad log type: {}", log_type);
        }
    }

    #[test]
    fn test_malformed_lines_wrap() {
        let config = ProducerConfig {
            malformed_rate: 1.0,
            ..ProducerConfig::default()
        };
        let producer = LineProducer::new(config);

        for line in producer.generate_batch(20) {
            let payload = JobPayload::parse_or_wrap(&line);
            assert!(payload.app_name.is_none());
            assert_eq!(payload.message, line);
        }
    }

    #[test]
    fn test_generate_batch_count() {
        let producer = LineProducer::with_defaults();
        assert_eq!(producer.generate_batch(10).len(), 10);
    }
}
