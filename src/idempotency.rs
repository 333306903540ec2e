//! Idempotency primitives: content-addressed job keys and the processed
//! marker set.
//!
//! The key collapses duplicate submissions of identical raw bytes into one
//! accepted unit of work; the marker records that a worker has begun handling
//! a key, so queue-level redeliveries are skipped instead of persisted twice.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

/// Derive the idempotency key for a raw line: the hex SHA-256 digest of its
/// bytes. Identical raw bytes always yield the same key.
pub fn idempotency_key(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Errors from the marker backend.
#[derive(Debug)]
pub enum MarkerError {
    /// The backing store could not complete the operation
    Backend(String),
}

impl std::fmt::Display for MarkerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarkerError::Backend(msg) => write!(f, "marker backend error: {}", msg),
        }
    }
}

impl std::error::Error for MarkerError {}

/// Set of idempotency keys a worker has begun handling.
///
/// The backing store must provide atomic, linearizable single-key operations;
/// no additional locking is layered on top by the pipeline. Lifecycle: a key
/// is inserted optimistically on claim, removed only when the job is
/// permanently unprocessable in its current form (validation failure), and
/// retained on success.
#[async_trait]
pub trait ProcessedMarker: Send + Sync {
    /// Atomically record that a key is being handled.
    ///
    /// Returns `true` when the key was absent and this call claimed it,
    /// `false` when the key was already present.
    async fn insert(&self, key: &str) -> Result<bool, MarkerError>;

    /// Remove a key, permitting a corrected re-submission of the same
    /// content to be processed.
    async fn remove(&self, key: &str) -> Result<(), MarkerError>;

    /// Check whether a key is present.
    async fn contains(&self, key: &str) -> Result<bool, MarkerError>;
}

/// In-memory marker set for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryMarker {
    keys: Mutex<HashSet<String>>,
}

impl InMemoryMarker {
    /// Create an empty marker set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently marked.
    pub fn len(&self) -> usize {
        self.keys.lock().map(|k| k.len()).unwrap_or(0)
    }

    /// Check if no keys are marked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ProcessedMarker for InMemoryMarker {
    async fn insert(&self, key: &str) -> Result<bool, MarkerError> {
        let mut keys = self
            .keys
            .lock()
            .map_err(|_| MarkerError::Backend("marker lock poisoned".to_string()))?;
        Ok(keys.insert(key.to_string()))
    }

    async fn remove(&self, key: &str) -> Result<(), MarkerError> {
        let mut keys = self
            .keys
            .lock()
            .map_err(|_| MarkerError::Backend("marker lock poisoned".to_string()))?;
        keys.remove(key);
        Ok(())
    }

    async fn contains(&self, key: &str) -> Result<bool, MarkerError> {
        let keys = self
            .keys
            .lock()
            .map_err(|_| MarkerError::Backend("marker lock poisoned".to_string()))?;
        Ok(keys.contains(key))
    }
}
