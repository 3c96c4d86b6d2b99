//! Key/value store abstraction
//!
//! The engine and the tester both talk to sensors through this seam: a
//! small async trait with scalar and list operations, one in-memory
//! implementation for tests and self-contained runs, and one sled-backed
//! implementation for durable deployments.
//!
//! The contract the engine relies on is read-after-write consistency
//! within a single cycle's writes; nothing stronger is assumed.

mod memory;
mod sled_store;

pub use memory::MemoryStore;
pub use sled_store::SledStore;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::types::Value;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store operation '{0}' timed out after {1:?}")]
    Timeout(String, Duration),

    #[error("Store backend failure: {0}")]
    Backend(String),

    #[error("Value for key '{0}' could not be decoded: {1}")]
    Codec(String, String),
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

// ============================================================================
// Store Trait
// ============================================================================

/// Async sensor store. Implementations must be cheap to clone behind an
/// `Arc` and safe for concurrent readers.
#[async_trait]
pub trait SensorStore: Send + Sync {
    /// Read one key. Missing keys read as [`Value::Absent`].
    async fn get(&self, key: &str) -> Result<Value, StoreError>;

    /// Write one key.
    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Write several keys. Visibility follows slice order; within one
    /// engine cycle this is the commit primitive.
    async fn batch_set(&self, entries: &[(String, Value)]) -> Result<(), StoreError>;

    /// Read a rolling list key (`buffer:` namespace). Missing keys read
    /// as an empty list.
    async fn get_list(&self, key: &str) -> Result<Vec<Value>, StoreError>;

    /// Replace a rolling list key.
    async fn set_list(&self, key: &str, values: &[Value]) -> Result<(), StoreError>;

    /// Delete one key.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// All keys matching a regular expression; used by the tester for
    /// output resets and by reporting.
    async fn keys_matching(&self, pattern: &regex::Regex) -> Result<Vec<String>, StoreError>;
}

// ============================================================================
// Retry
// ============================================================================

/// Base delay for transient-failure retries; doubles per attempt.
const RETRY_BASE: Duration = Duration::from_millis(10);

/// Run a store operation with a per-operation timeout and exponential
/// backoff, bounded by `budget`.
///
/// Transient failures retry until the budget is spent; the final error is
/// returned so the caller can degrade to best-effort for the cycle.
pub async fn with_retry<T, F, Fut>(
    op_name: &str,
    budget: Duration,
    mut op: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, StoreError>>,
{
    let deadline = tokio::time::Instant::now() + budget;
    let mut backoff = RETRY_BASE;
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(StoreError::Timeout(op_name.to_string(), budget));
        }
        match tokio::time::timeout(remaining, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => {
                let now = tokio::time::Instant::now();
                if now + backoff >= deadline {
                    warn!("Store op '{}' failed after {} attempt(s): {}", op_name, attempt, err);
                    return Err(err);
                }
                warn!(
                    "Store op '{}' attempt {} failed ({}), retrying in {:?}",
                    op_name, attempt, err, backoff
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            Err(_) => {
                return Err(StoreError::Timeout(op_name.to_string(), budget));
            }
        }
    }
}
