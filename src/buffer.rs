//! Shared buffer contract and in-memory implementation.
//!
//! The buffer is the hand-off point between bursty producers and the slower
//! drainer: an ordered, multi-producer queue of raw serialized log lines.
//! Peeking never removes lines; only the drainer trims, and only after the
//! peeked lines are confirmed represented downstream. That ordering is what
//! makes the buffer-to-queue hand-off at-least-once.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

/// Default line capacity for the in-memory buffer.
const DEFAULT_MAX_LINES: usize = 100_000;

/// Errors that can occur during buffer operations.
#[derive(Debug)]
pub enum BufferError {
    /// The buffer is at capacity and rejected the push
    Full,

    /// The buffer backend could not be reached
    Unreachable(String),
}

impl std::fmt::Display for BufferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BufferError::Full => write!(f, "buffer is at capacity"),
            BufferError::Unreachable(msg) => write!(f, "buffer unreachable: {}", msg),
        }
    }
}

impl std::error::Error for BufferError {}

/// Ordered, multi-producer queue of raw log lines.
///
/// Producers push to the tail; the single drainer peeks a bounded range at
/// the head and trims exactly what it peeked once the batch is safely
/// submitted.
#[async_trait]
pub trait SharedBuffer: Send + Sync {
    /// Append a raw line to the tail.
    async fn push(&self, line: String) -> Result<(), BufferError>;

    /// Read up to `max` lines from the head without removing them.
    ///
    /// Returns immediately with an empty vector when nothing is buffered; the
    /// drainer never blocks waiting for lines.
    async fn peek_range(&self, max: usize) -> Result<Vec<String>, BufferError>;

    /// Atomically remove `count` lines from the head.
    async fn trim_front(&self, count: usize) -> Result<(), BufferError>;

    /// Number of lines currently buffered.
    async fn len(&self) -> Result<usize, BufferError>;
}

/// In-memory shared buffer for tests and single-process deployments.
///
/// Pushes are rejected with [`BufferError::Full`] at capacity rather than
/// dropping buffered lines: lines already peeked by the drainer must stay in
/// place until it trims them, or the trim count would no longer match.
#[derive(Debug)]
pub struct InMemoryBuffer {
    lines: Mutex<VecDeque<String>>,
    max_lines: usize,
}

impl InMemoryBuffer {
    /// Create a buffer with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_LINES)
    }

    /// Create a buffer holding at most `max_lines` lines.
    pub fn with_capacity(max_lines: usize) -> Self {
        Self {
            lines: Mutex::new(VecDeque::new()),
            max_lines,
        }
    }

    fn locked(&self) -> Result<MutexGuard<'_, VecDeque<String>>, BufferError> {
        self.lines
            .lock()
            .map_err(|_| BufferError::Unreachable("buffer lock poisoned".to_string()))
    }
}

impl Default for InMemoryBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SharedBuffer for InMemoryBuffer {
    async fn push(&self, line: String) -> Result<(), BufferError> {
        let mut lines = self.locked()?;
        if lines.len() >= self.max_lines {
            return Err(BufferError::Full);
        }
        lines.push_back(line);
        Ok(())
    }

    async fn peek_range(&self, max: usize) -> Result<Vec<String>, BufferError> {
        let lines = self.locked()?;
        Ok(lines.iter().take(max).cloned().collect())
    }

    async fn trim_front(&self, count: usize) -> Result<(), BufferError> {
        let mut lines = self.locked()?;
        let count = count.min(lines.len());
        lines.drain(0..count);
        Ok(())
    }

    async fn len(&self) -> Result<usize, BufferError> {
        Ok(self.locked()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_push_and_peek_preserve_order() {
        let buffer = InMemoryBuffer::new();
        buffer.push("first".to_string()).await.unwrap();
        buffer.push("second".to_string()).await.unwrap();
        buffer.push("third".to_string()).await.unwrap();

        let peeked = buffer.peek_range(2).await.unwrap();
        assert_eq!(peeked, vec!["first".to_string(), "second".to_string()]);
    }

    #[tokio::test]
    async fn test_peek_does_not_remove() {
        let buffer = InMemoryBuffer::new();
        buffer.push("line".to_string()).await.unwrap();

        let first = buffer.peek_range(10).await.unwrap();
        let second = buffer.peek_range(10).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(buffer.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_peek_empty_returns_immediately() {
        let buffer = InMemoryBuffer::new();
        assert!(buffer.peek_range(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_trim_front_removes_exact_count() {
        let buffer = InMemoryBuffer::new();
        for i in 0..5 {
            buffer.push(format!("line-{}", i)).await.unwrap();
        }

        buffer.trim_front(3).await.unwrap();
        assert_eq!(buffer.len().await.unwrap(), 2);
        assert_eq!(
            buffer.peek_range(10).await.unwrap(),
            vec!["line-3".to_string(), "line-4".to_string()]
        );
    }

    #[tokio::test]
    async fn test_trim_beyond_len_clears_buffer() {
        let buffer = InMemoryBuffer::new();
        buffer.push("only".to_string()).await.unwrap();
        buffer.trim_front(10).await.unwrap();
        assert_eq!(buffer.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_push_rejected_at_capacity() {
        let buffer = InMemoryBuffer::with_capacity(2);
        buffer.push("a".to_string()).await.unwrap();
        buffer.push("b".to_string()).await.unwrap();

        let result = buffer.push("c".to_string()).await;
        assert!(matches!(result, Err(BufferError::Full)));
        assert_eq!(buffer.len().await.unwrap(), 2);
    }

    #[test]
    fn test_buffer_error_display() {
        assert_eq!(format!("{}", BufferError::Full), "buffer is at capacity");
        assert!(format!("{}", BufferError::Unreachable("down".to_string())).contains("down"));
    }
}
