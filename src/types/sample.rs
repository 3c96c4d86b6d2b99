//! Timestamped sensor samples

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Value;

/// One observation of one sensor.
///
/// Carries both clocks: the monotonic timestamp (milliseconds since engine
/// start) drives window arithmetic and deadlines; the wall-clock timestamp
/// exists only for logging and scenario reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub value: Value,
    /// Monotonic milliseconds since engine start.
    pub mono_ms: u64,
    /// Wall-clock time at snapshot, for reports only.
    pub wall: DateTime<Utc>,
}

impl Sample {
    pub fn new(value: Value, mono_ms: u64) -> Self {
        Self {
            value,
            mono_ms,
            wall: Utc::now(),
        }
    }

    pub fn is_present(&self) -> bool {
        self.value.is_present()
    }
}
