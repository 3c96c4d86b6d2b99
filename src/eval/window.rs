//! Per-sensor history windows and the sustained-predicate operator
//!
//! The store keeps one bounded ring of timestamped samples per registered
//! sensor, written only by the orchestrator during the snapshot step and
//! read concurrently during layer evaluation. The single temporal operator
//! is `sustained(sensor, P, D)`: did `P` hold for every sample in the
//! trailing window `[now - D, now]`?
//!
//! Semantics in brief:
//! - one present sample violating `P` inside the window forces False and,
//!   by staying in the window for `D`, delays the next True by `D`
//! - Absent samples pause the window: the result is Indeterminate until the
//!   gap either resolves through the caller's fallback value or ages out
//! - the boundary is inclusive: a sample exactly `D` old still counts
//! - a window without `D` of accumulated history is False, not True

use std::collections::{HashMap, VecDeque};

use tracing::{debug, warn};

use crate::eval::expr::CompareOp;
use crate::types::{Kleene, Sample, Value};

/// Extra samples kept beyond the duration-derived capacity, so boundary
/// samples survive until they are strictly out of every referenced window.
const CAPACITY_MARGIN: usize = 4;

/// Interned sensor handle; indexes the store's flat buffer array.
pub type SensorId = usize;

// ============================================================================
// Per-Sensor Window
// ============================================================================

#[derive(Debug)]
struct SensorWindow {
    key: String,
    /// Longest sustained duration any rule evaluates over this sensor.
    max_duration_ms: u64,
    capacity: usize,
    samples: VecDeque<Sample>,
    /// Most recent present sample, kept independently of eviction for
    /// use_last_known fallback resolution.
    last_present: Option<(u64, Value)>,
}

impl SensorWindow {
    fn push(&mut self, sample: Sample) {
        if let Some(last) = self.samples.back() {
            if sample.mono_ms < last.mono_ms {
                warn!(
                    "Window for '{}' received out-of-order sample ({} < {}), dropping",
                    self.key, sample.mono_ms, last.mono_ms
                );
                return;
            }
        }
        if sample.is_present() {
            self.last_present = Some((sample.mono_ms, sample.value.clone()));
        }
        self.samples.push_back(sample);
        self.evict();
    }

    /// Entries are evicted only when strictly older than the longest
    /// referenced duration (plus margin), measured from the newest sample.
    fn evict(&mut self) {
        let Some(newest) = self.samples.back().map(|s| s.mono_ms) else {
            return;
        };
        let horizon = newest.saturating_sub(self.max_duration_ms);
        while let Some(front) = self.samples.front() {
            let stale = front.mono_ms < horizon && self.samples.len() > CAPACITY_MARGIN;
            let over_capacity = self.samples.len() > self.capacity;
            if stale || over_capacity {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }
}

// ============================================================================
// Window Store
// ============================================================================

/// All sensor windows, interned by key.
#[derive(Debug, Default)]
pub struct WindowStore {
    ids: HashMap<String, SensorId>,
    windows: Vec<SensorWindow>,
    cycle_period_ms: u64,
}

impl WindowStore {
    pub fn new(cycle_period_ms: u64) -> Self {
        Self {
            ids: HashMap::new(),
            windows: Vec::new(),
            cycle_period_ms,
        }
    }

    /// Register a sensor with the longest duration any rule sustains over
    /// it (0 for sensors tracked only for last-known fallback).
    ///
    /// `capacity_limit` caps the ring regardless of duration; 0 means no cap.
    pub fn register(&mut self, key: &str, max_duration_ms: u64, capacity_limit: usize) -> SensorId {
        if let Some(&id) = self.ids.get(key) {
            return id;
        }
        let period = self.cycle_period_ms.max(1);
        let from_duration = (max_duration_ms as usize).div_ceil(period as usize) + CAPACITY_MARGIN;
        let capacity = if capacity_limit > 0 {
            from_duration.min(capacity_limit)
        } else {
            from_duration
        };
        let id = self.windows.len();
        self.windows.push(SensorWindow {
            key: key.to_string(),
            max_duration_ms,
            capacity,
            samples: VecDeque::with_capacity(capacity),
            last_present: None,
        });
        self.ids.insert(key.to_string(), id);
        debug!("Registered window for '{}' (capacity {})", key, capacity);
        id
    }

    pub fn id_of(&self, key: &str) -> Option<SensorId> {
        self.ids.get(key).copied()
    }

    /// Append one snapshot sample. Called only from the snapshot step.
    pub fn record(&mut self, id: SensorId, sample: Sample) {
        if let Some(window) = self.windows.get_mut(id) {
            window.push(sample);
        }
    }

    /// Most recent present value and its timestamp, for use_last_known.
    pub fn last_present(&self, key: &str) -> Option<(u64, Value)> {
        let id = self.id_of(key)?;
        self.windows.get(id).and_then(|w| w.last_present.clone())
    }

    /// Evaluate `sustained(sensor op threshold, duration)` at `now_ms`.
    ///
    /// `gap_value` is the fallback-resolved substitute for Absent samples
    /// this cycle (None when the rule has no resolving fallback for the
    /// sensor); it decides whether a gap pauses or breaks accumulation.
    pub fn sustained(
        &self,
        key: &str,
        op: CompareOp,
        threshold: f64,
        duration_ms: u64,
        now_ms: u64,
        gap_value: Option<&Value>,
    ) -> Kleene {
        let Some(id) = self.id_of(key) else {
            return Kleene::Indeterminate;
        };
        let Some(window) = self.windows.get(id) else {
            return Kleene::Indeterminate;
        };

        let rhs = Value::Number(threshold);

        // A duration shorter than the cycle period degenerates to "the
        // latest sample satisfies P" (flagged as a warning at plan time).
        if duration_ms < self.cycle_period_ms {
            let Some(latest) = window.samples.back() else {
                return Kleene::Indeterminate;
            };
            return match resolve_gap(&latest.value, gap_value) {
                Some(v) => op.apply(&v, &rhs),
                None => Kleene::Indeterminate,
            };
        }

        let start = now_ms.saturating_sub(duration_ms);

        // Coverage: the history must reach back to the window start before
        // D of accumulation can possibly exist. A clock younger than D
        // cannot be covered no matter what was sampled.
        let has_coverage = now_ms >= duration_ms
            && window
                .samples
                .front()
                .is_some_and(|oldest| oldest.mono_ms <= start);

        let mut unresolved_gap = false;
        for sample in window.samples.iter().filter(|s| s.mono_ms >= start) {
            match resolve_gap(&sample.value, gap_value) {
                Some(v) => match op.apply(&v, &rhs) {
                    // One present counter-sample disproves the window and
                    // restarts establishment.
                    Kleene::False => return Kleene::False,
                    Kleene::True => {}
                    Kleene::Indeterminate => unresolved_gap = true,
                },
                None => unresolved_gap = true,
            }
        }

        if unresolved_gap {
            return Kleene::Indeterminate;
        }
        if !has_coverage {
            return Kleene::False;
        }
        Kleene::True
    }
}

/// Substitute the cycle's fallback-resolved value for an Absent sample.
fn resolve_gap(observed: &Value, gap_value: Option<&Value>) -> Option<Value> {
    if observed.is_present() {
        return Some(observed.clone());
    }
    gap_value.filter(|v| v.is_present()).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERIOD: u64 = 100;

    fn store_with(key: &str, duration: u64) -> (WindowStore, SensorId) {
        let mut store = WindowStore::new(PERIOD);
        let id = store.register(key, duration, 0);
        (store, id)
    }

    fn feed(store: &mut WindowStore, id: SensorId, cycle: u64, value: Value) {
        store.record(id, Sample::new(value, cycle * PERIOD));
    }

    fn sustained_at(store: &WindowStore, cycle: u64) -> Kleene {
        store.sustained(
            "input:temperature",
            CompareOp::Gt,
            100.0,
            1000,
            cycle * PERIOD,
            None,
        )
    }

    #[test]
    fn establishment_needs_the_full_duration() {
        let (mut store, id) = store_with("input:temperature", 1000);
        // 5 cycles of 110: only 0.5s accumulated
        for cycle in 1..=5 {
            feed(&mut store, id, cycle, Value::Number(110.0));
        }
        assert_eq!(sustained_at(&store, 5), Kleene::False);

        // 6 more cycles: established at cycle 11 (samples back to t=100,
        // window start at t=1100-1000=100, inclusive)
        for cycle in 6..=11 {
            feed(&mut store, id, cycle, Value::Number(110.0));
        }
        assert_eq!(sustained_at(&store, 11), Kleene::True);
    }

    #[test]
    fn one_counter_sample_interrupts_for_a_full_duration() {
        let (mut store, id) = store_with("input:temperature", 1000);
        for cycle in 1..=11 {
            feed(&mut store, id, cycle, Value::Number(110.0));
        }
        assert_eq!(sustained_at(&store, 11), Kleene::True);

        // Drop below threshold once
        feed(&mut store, id, 12, Value::Number(90.0));
        assert_eq!(sustained_at(&store, 12), Kleene::False);

        // Recover; the counter-sample at t=1200 stays in the window
        // (inclusive boundary) through t=2200
        for cycle in 13..=22 {
            feed(&mut store, id, cycle, Value::Number(110.0));
        }
        assert_eq!(sustained_at(&store, 22), Kleene::False);

        feed(&mut store, id, 23, Value::Number(110.0));
        assert_eq!(sustained_at(&store, 23), Kleene::True);
    }

    #[test]
    fn boundary_sample_exactly_at_window_edge_counts() {
        let (mut store, id) = store_with("input:temperature", 1000);
        feed(&mut store, id, 2, Value::Number(90.0));
        for cycle in 3..=12 {
            feed(&mut store, id, cycle, Value::Number(110.0));
        }
        // At t=1200 the ¬P sample at t=200 is exactly D old: still in window.
        assert_eq!(sustained_at(&store, 12), Kleene::False);
        feed(&mut store, id, 13, Value::Number(110.0));
        assert_eq!(sustained_at(&store, 13), Kleene::True);
    }

    #[test]
    fn absent_gap_pauses_instead_of_failing() {
        let (mut store, id) = store_with("input:temperature", 1000);
        for cycle in 1..=11 {
            feed(&mut store, id, cycle, Value::Number(110.0));
        }
        feed(&mut store, id, 12, Value::Absent);
        // No disproof, but the gap blocks True.
        assert_eq!(sustained_at(&store, 12), Kleene::Indeterminate);
    }

    #[test]
    fn gap_resolved_compatible_preserves_accumulation() {
        let (mut store, id) = store_with("input:temperature", 1000);
        for cycle in 1..=11 {
            feed(&mut store, id, cycle, Value::Number(110.0));
        }
        feed(&mut store, id, 12, Value::Absent);
        let result = store.sustained(
            "input:temperature",
            CompareOp::Gt,
            100.0,
            1000,
            1200,
            Some(&Value::Number(105.0)),
        );
        assert_eq!(result, Kleene::True);
    }

    #[test]
    fn gap_resolved_incompatible_breaks_the_window() {
        let (mut store, id) = store_with("input:temperature", 1000);
        for cycle in 1..=11 {
            feed(&mut store, id, cycle, Value::Number(110.0));
        }
        feed(&mut store, id, 12, Value::Absent);
        let result = store.sustained(
            "input:temperature",
            CompareOp::Gt,
            100.0,
            1000,
            1200,
            Some(&Value::Number(50.0)),
        );
        assert_eq!(result, Kleene::False);
    }

    #[test]
    fn counter_sample_dominates_gaps() {
        let (mut store, id) = store_with("input:temperature", 1000);
        feed(&mut store, id, 5, Value::Absent);
        feed(&mut store, id, 6, Value::Number(90.0));
        for cycle in 7..=12 {
            feed(&mut store, id, cycle, Value::Number(110.0));
        }
        // Window [200, 1200] holds both a gap and a ¬P sample: False wins.
        assert_eq!(sustained_at(&store, 12), Kleene::False);
    }

    #[test]
    fn sub_period_duration_degenerates_to_latest_sample() {
        let mut store = WindowStore::new(PERIOD);
        let id = store.register("input:temperature", 50, 0);
        feed(&mut store, id, 1, Value::Number(110.0));
        let result = store.sustained("input:temperature", CompareOp::Gt, 100.0, 50, 100, None);
        assert_eq!(result, Kleene::True);
    }

    #[test]
    fn interruption_matches_the_windowed_timeline() {
        // P for 700ms, ¬P for 200ms, then P again: True only once the ¬P
        // span is a full duration old: 1900ms, not 1100ms.
        let (mut store, id) = store_with("input:temperature", 1000);
        for cycle in 1..=7 {
            feed(&mut store, id, cycle, Value::Number(110.0));
        }
        for cycle in 8..=9 {
            feed(&mut store, id, cycle, Value::Number(90.0));
        }
        for cycle in 10..=21 {
            feed(&mut store, id, cycle, Value::Number(110.0));
        }
        assert_eq!(sustained_at(&store, 11), Kleene::False);
        assert_eq!(sustained_at(&store, 18), Kleene::False);
        // ¬P samples at t=800,900; at t=1900 the window [900,1900]
        // still includes t=900 (inclusive): False
        assert_eq!(sustained_at(&store, 19), Kleene::False);
        // at t=2000 the window [1000,2000] is clean and covered
        assert_eq!(sustained_at(&store, 20), Kleene::True);
    }

    #[test]
    fn out_of_order_samples_are_dropped() {
        let (mut store, id) = store_with("input:temperature", 1000);
        feed(&mut store, id, 5, Value::Number(110.0));
        feed(&mut store, id, 3, Value::Number(90.0));
        assert_eq!(store.last_present("input:temperature"), Some((500, Value::Number(110.0))));
    }

    #[test]
    fn eviction_keeps_boundary_samples() {
        let (mut store, id) = store_with("input:temperature", 1000);
        for cycle in 1..=50 {
            feed(&mut store, id, cycle, Value::Number(110.0));
        }
        // Samples strictly older than newest - D (minus margin) are gone,
        // but the window still evaluates correctly at the newest edge.
        assert_eq!(sustained_at(&store, 50), Kleene::True);
    }

    #[test]
    fn last_present_survives_absent_samples() {
        let (mut store, id) = store_with("input:flow", 0);
        store.record(id, Sample::new(Value::Number(7.5), 100));
        store.record(id, Sample::new(Value::Absent, 200));
        assert_eq!(store.last_present("input:flow"), Some((100, Value::Number(7.5))));
    }
}
