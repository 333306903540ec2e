//! Durable log store contract and implementations.
//!
//! The store is the system of record for validated log entries. The pipeline
//! writes each record exactly once per successful pass; retry of a failed
//! write belongs to the queue, so the HTTP store makes a single attempt and
//! reports the failure.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::config::Config;
use crate::model::EnrichedLogRecord;

/// Errors that can occur during store writes.
#[derive(Debug)]
pub enum StoreError {
    /// The store backend could not be reached
    Unreachable(String),

    /// The store answered with an error status
    Rejected { status: StatusCode, message: String },

    /// The HTTP client could not be built
    Config(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Unreachable(msg) => write!(f, "store unreachable: {}", msg),
            StoreError::Rejected { status, message } => {
                write!(f, "store rejected write ({}): {}", status, message)
            }
            StoreError::Config(msg) => write!(f, "store client configuration error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

/// System of record for validated log entries.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Persist one validated record.
    async fn insert(&self, record: &EnrichedLogRecord) -> Result<(), StoreError>;
}

/// Build the pooled HTTP client shared by the store and resolver.
pub fn build_http_client(config: &Config) -> Result<Client, StoreError> {
    Client::builder()
        .timeout(config.request_timeout)
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(90))
        .build()
        .map_err(|e| StoreError::Config(e.to_string()))
}

/// Store backed by the admin application's HTTP API.
pub struct HttpStore {
    client: Client,
    insert_url: String,
}

impl HttpStore {
    /// Create a store against the admin API base URL.
    pub fn new(client: Client, api_url: &str) -> Self {
        Self {
            client,
            insert_url: format!("{}/api/v1/logs", api_url),
        }
    }

    /// The configured insert endpoint.
    pub fn insert_url(&self) -> &str {
        &self.insert_url
    }
}

#[async_trait]
impl DurableStore for HttpStore {
    async fn insert(&self, record: &EnrichedLogRecord) -> Result<(), StoreError> {
        let response = self
            .client
            .post(&self.insert_url)
            .json(record)
            .send()
            .await
            .map_err(|e| StoreError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!(app_id = %record.app_id, "record persisted");
            Ok(())
        } else {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            Err(StoreError::Rejected { status, message })
        }
    }
}

/// In-memory store for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: Mutex<Vec<EnrichedLogRecord>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the stored records.
    pub fn records(&self) -> Vec<EnrichedLogRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DurableStore for InMemoryStore {
    async fn insert(&self, record: &EnrichedLogRecord) -> Result<(), StoreError> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| StoreError::Unreachable("store lock poisoned".to_string()))?;
        records.push(record.clone());
        Ok(())
    }
}
