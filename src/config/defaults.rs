//! System-wide default constants.
//!
//! Centralises every tunable default in one place; the loaded
//! configuration starts from these and applies file and environment
//! overrides on top.

/// Base period of the cycle loop (ms).
pub const DEFAULT_CYCLE_PERIOD_MS: u64 = 100;

/// Upper bound on per-sensor window samples. Durations referenced by rules
/// size each ring; this caps them regardless.
pub const DEFAULT_BUFFER_CAPACITY: usize = 1024;

/// Floor for the per-operation store timeout, so very fast cycles do not
/// starve retries entirely (ms).
pub const MIN_STORE_OP_TIMEOUT_MS: u64 = 20;

/// Neutral numeric fill for sensors a scenario step must populate but no
/// condition constrains.
pub const NEUTRAL_SENSOR_VALUE: f64 = 42.0;

/// Margin added to a comparison threshold when synthesizing a satisfying
/// value: `T + max(MARGIN_MIN, MARGIN_FRACTION * |T|)`.
pub const COMPARISON_MARGIN_MIN: f64 = 5.0;
pub const COMPARISON_MARGIN_FRACTION: f64 = 0.1;

/// Scenario runner scaling defaults.
pub const DEFAULT_STEP_DELAY_MULTIPLIER: f64 = 1.0;
pub const DEFAULT_TIMEOUT_MULTIPLIER: f64 = 1.0;
pub const DEFAULT_GLOBAL_TIMEOUT_MULTIPLIER: f64 = 1.0;

/// Default per-expectation poll timeout (ms).
pub const DEFAULT_EXPECTATION_TIMEOUT_MS: u64 = 1_000;

/// Poll interval while waiting on an expectation (ms).
pub const EXPECTATION_POLL_INTERVAL_MS: u64 = 20;

/// Default numeric comparison tolerance; roughly one cycle for
/// time-valued outputs, harmless for plain numbers.
pub const DEFAULT_NUMERIC_TOLERANCE: f64 = 1e-6;
