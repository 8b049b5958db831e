//! Durable stream store abstraction.
//!
//! The store is a key-addressed structure provider (streams, hashes, sorted
//! sets) used for fan-out to downstream workers. It is never the system of
//! record.

mod memory;
mod valkey;

pub use memory::{InMemoryStreamStore, StreamEntry};
pub use valkey::RedisStreamStore;

use async_trait::async_trait;
use thiserror::Error;

/// Type name the store reports for a key that does not exist.
pub const MISSING_TYPE: &str = "none";

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("stream store command '{command}' failed: {message}")]
    Command {
        command: &'static str,
        message: String,
    },
    #[error("stream store connection failed: {0}")]
    Connection(String),
    #[error("failed to encode stream record: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl StreamError {
    pub fn command(command: &'static str, message: impl Into<String>) -> Self {
        StreamError::Command {
            command,
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait StreamStore: Send + Sync {
    /// Type of the structure stored at `key`, or [`MISSING_TYPE`].
    async fn key_type(&self, key: &str) -> Result<String, StreamError>;

    /// Append an entry to a stream, creating it if needed. Returns the entry id.
    async fn append(&self, stream: &str, fields: &[(&str, &str)]) -> Result<String, StreamError>;

    /// Set a hash field unless it already exists. Returns whether it was set.
    async fn hash_set_if_absent(
        &self,
        key: &str,
        field: &str,
        value: &str,
    ) -> Result<bool, StreamError>;

    /// Add a sorted-set member unless it already exists. Returns whether it
    /// was added.
    async fn sorted_set_add(&self, key: &str, member: &str, score: f64)
        -> Result<bool, StreamError>;
}
