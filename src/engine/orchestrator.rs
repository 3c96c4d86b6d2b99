//! The cycle orchestrator
//!
//! Runs the fixed-period evaluation loop:
//!
//! 1. **Snapshot**: read every referenced `input:` key into an immutable
//!    per-cycle map, stamp it with monotonic time, append to the windows
//! 2. **Layered evaluation**: evaluate each dependency layer in order,
//!    rules within a layer concurrently; a layer's writes become visible
//!    to the next layer only
//! 3. **Commit**: push all scalar writes as one batch, then buffer lists,
//!    so downstream readers never observe a later layer before an earlier
//!    one within the same cycle
//! 4. **Deadline**: an overrun is logged and the missed tick skipped; the
//!    loop never runs catch-up bursts
//!
//! Shutdown is cooperative: cancellation is honored between layers, the
//! writes accumulated so far still commit, and `run` returns after the
//! in-flight cycle.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::eval::rule_eval::{self, RuleRuntime};
use crate::eval::window::{SensorId, WindowStore};
use crate::rules::model::{Rule, RuleSet};
use crate::rules::planner::{self, ExecutionPlan, PlanError};
use crate::store::{with_retry, SensorStore};
use crate::types::{Sample, Value};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Plan(#[from] PlanError),
}

// ============================================================================
// Statistics
// ============================================================================

/// Counters accumulated across the engine's lifetime.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStats {
    pub cycles_run: u64,
    pub overruns: u64,
    pub rules_evaluated: u64,
    pub rules_skipped: u64,
    pub outputs_written: u64,
    pub buffer_appends: u64,
    pub store_errors: u64,
}

// ============================================================================
// Engine
// ============================================================================

/// Owns the execution plan, window store, and per-rule runtime state;
/// drives the cycle loop against a [`SensorStore`].
pub struct Engine {
    rules: Arc<Vec<Rule>>,
    plan: ExecutionPlan,
    config: EngineConfig,
    store: Arc<dyn SensorStore>,
    windows: Arc<RwLock<WindowStore>>,
    /// Interned ids for the per-cycle snapshot set.
    snapshot_ids: Vec<(String, SensorId)>,
    /// Temporally-referenced sensors that are not inputs (rule outputs);
    /// sampled after evaluation each cycle.
    temporal_outputs: Vec<(String, SensorId)>,
    /// Per-rule emit-policy state, parallel to `rules`. Entries are taken
    /// while their rule is being evaluated on a worker.
    runtimes: Vec<Option<RuleRuntime>>,
    /// Engine-owned rolling buffer contents; `buffer:` store keys are
    /// derived from these on commit.
    buffers: HashMap<String, VecDeque<Value>>,
    started_at: tokio::time::Instant,
    stats: EngineStats,
}

impl Engine {
    pub fn new(
        rule_set: RuleSet,
        config: EngineConfig,
        store: Arc<dyn SensorStore>,
    ) -> Result<Self, EngineError> {
        let plan = planner::plan(&rule_set, config.cycle_period_ms)?;

        let mut windows = WindowStore::new(config.cycle_period_ms);
        let mut snapshot_ids = Vec::with_capacity(plan.input_keys.len());
        for key in &plan.input_keys {
            let duration = plan.window_durations_ms.get(key).copied().unwrap_or(0);
            let id = windows.register(key, duration, config.buffer_capacity);
            snapshot_ids.push((key.clone(), id));
        }
        let mut temporal_outputs = Vec::new();
        for (key, &duration) in &plan.window_durations_ms {
            if !plan.input_keys.contains(key) {
                let id = windows.register(key, duration, config.buffer_capacity);
                temporal_outputs.push((key.clone(), id));
            }
        }

        let runtimes = rule_set
            .rules
            .iter()
            .map(|_| Some(RuleRuntime::default()))
            .collect();

        info!(
            "Engine ready: {} rule(s) in {} layer(s), {} snapshot sensor(s), period {}ms",
            rule_set.rules.len(),
            plan.layers.len(),
            snapshot_ids.len(),
            config.cycle_period_ms
        );

        Ok(Self {
            rules: Arc::new(rule_set.rules),
            plan,
            config,
            store,
            windows: Arc::new(RwLock::new(windows)),
            snapshot_ids,
            temporal_outputs,
            runtimes,
            buffers: HashMap::new(),
            started_at: tokio::time::Instant::now(),
            stats: EngineStats::default(),
        })
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn layer_count(&self) -> usize {
        self.plan.layers.len()
    }

    /// Run the cycle loop until cancelled. Returns final statistics.
    pub async fn run(mut self, cancel: CancellationToken) -> EngineStats {
        let period = self.config.cycle_period();
        let mut interval = tokio::time::interval(period);
        // Overruns skip the missed tick instead of bursting to catch up.
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Cycle loop started (period {:?})", period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Shutdown signal received, completing in-flight cycle");
                    break;
                }
                _ = interval.tick() => {}
            }

            let cycle_start = tokio::time::Instant::now();
            self.step(&cancel).await;
            let elapsed = cycle_start.elapsed();
            if elapsed > period {
                self.stats.overruns += 1;
                warn!(
                    "Cycle {} overran its period: {:?} > {:?}",
                    self.stats.cycles_run, elapsed, period
                );
            }

            if cancel.is_cancelled() {
                break;
            }
        }

        let stats = self.stats.clone();
        info!("Cycle loop stopped");
        info!("   Cycles run:      {}", stats.cycles_run);
        info!("   Overruns:        {}", stats.overruns);
        info!("   Rules evaluated: {}", stats.rules_evaluated);
        info!("   Outputs written: {}", stats.outputs_written);
        info!("   Buffer appends:  {}", stats.buffer_appends);
        info!("   Store errors:    {}", stats.store_errors);
        stats
    }

    /// Execute exactly one cycle: snapshot, layered evaluation, commit.
    ///
    /// Public so tests (and in-process tester runs) can drive the engine
    /// deterministically without the timer loop.
    pub async fn step(&mut self, cancel: &CancellationToken) {
        let now_ms = self.started_at.elapsed().as_millis() as u64;
        self.stats.cycles_run += 1;

        // --- Snapshot ---------------------------------------------------
        let snapshot = self.read_snapshot().await;
        {
            let mut windows = self.windows.write().await;
            for (key, id) in &self.snapshot_ids {
                let value = snapshot.get(key).cloned().unwrap_or(Value::Absent);
                windows.record(*id, Sample::new(value, now_ms));
            }
        }

        // --- Layered evaluation -----------------------------------------
        let mut visible = snapshot;
        let mut pending: Vec<(String, Value)> = Vec::new();
        let mut touched_buffers: Vec<String> = Vec::new();

        for (layer_idx, layer) in self.plan.layers.clone().iter().enumerate() {
            if cancel.is_cancelled() {
                debug!(
                    "Cancellation observed before layer {}; committing partial cycle",
                    layer_idx
                );
                break;
            }

            let shared_visible = Arc::new(visible.clone());
            let mut tasks = Vec::with_capacity(layer.len());
            for &rule_idx in layer {
                let rules = Arc::clone(&self.rules);
                let windows = Arc::clone(&self.windows);
                let visible = Arc::clone(&shared_visible);
                let mut runtime = self.runtimes[rule_idx].take().unwrap_or_default();
                tasks.push(tokio::spawn(async move {
                    let outcome = {
                        let windows = windows.read().await;
                        rule_eval::evaluate(
                            &rules[rule_idx],
                            visible.as_ref(),
                            &windows,
                            now_ms,
                            &mut runtime,
                        )
                    };
                    (rule_idx, runtime, outcome)
                }));
            }

            for joined in join_all(tasks).await {
                let Ok((rule_idx, runtime, outcome)) = joined else {
                    warn!("Rule evaluation task panicked; runtime state reset");
                    continue;
                };
                self.runtimes[rule_idx] = Some(runtime);

                if outcome.condition.is_none() {
                    self.stats.rules_skipped += 1;
                } else {
                    self.stats.rules_evaluated += 1;
                }

                for (key, value) in outcome.writes {
                    visible.insert(key.to_string(), value.clone());
                    pending.push((key.to_string(), value));
                    self.stats.outputs_written += 1;
                }
                for append in outcome.buffer_writes {
                    let key = append.key.to_string();
                    let buffer = self.buffers.entry(key.clone()).or_default();
                    buffer.push_back(append.value);
                    while buffer.len() > append.max_items {
                        buffer.pop_front();
                    }
                    if !touched_buffers.contains(&key) {
                        touched_buffers.push(key);
                    }
                    self.stats.buffer_appends += 1;
                }
            }
        }

        // --- Post-evaluation window samples for temporal outputs --------
        if !self.temporal_outputs.is_empty() {
            let mut windows = self.windows.write().await;
            for (key, id) in &self.temporal_outputs {
                let value = visible.get(key).cloned().unwrap_or(Value::Absent);
                windows.record(*id, Sample::new(value, now_ms));
            }
        }

        // --- Commit ------------------------------------------------------
        self.commit(&pending, &touched_buffers).await;
    }

    /// Read all referenced inputs; failures degrade to Absent so the cycle
    /// proceeds best-effort.
    async fn read_snapshot(&mut self) -> HashMap<String, Value> {
        let timeout = self.config.store_timeout();
        let mut snapshot = HashMap::with_capacity(self.snapshot_ids.len());
        for (key, _) in &self.snapshot_ids {
            let store = Arc::clone(&self.store);
            let result = with_retry("get", timeout, || {
                let store = Arc::clone(&store);
                let key = key.clone();
                async move { store.get(&key).await }
            })
            .await;
            let value = match result {
                Ok(v) => v,
                Err(e) => {
                    warn!("Snapshot read of '{}' failed ({}), treating as absent", key, e);
                    self.stats.store_errors += 1;
                    Value::Absent
                }
            };
            snapshot.insert(key.clone(), value);
        }
        snapshot
    }

    /// Commit all scalar writes as one batch, then rewrite touched buffers.
    async fn commit(&mut self, pending: &[(String, Value)], touched_buffers: &[String]) {
        let timeout = self.config.store_timeout();

        if !pending.is_empty() {
            let store = Arc::clone(&self.store);
            let result = with_retry("batch_set", timeout, || {
                let store = Arc::clone(&store);
                let entries = pending.to_vec();
                async move { store.batch_set(&entries).await }
            })
            .await;
            if let Err(e) = result {
                warn!("Cycle commit failed, outputs dropped this cycle: {}", e);
                self.stats.store_errors += 1;
            }
        }

        for key in touched_buffers {
            let Some(items) = self.buffers.get(key) else {
                continue;
            };
            let values: Vec<Value> = items.iter().cloned().collect();
            let store = Arc::clone(&self.store);
            let result = with_retry("set_list", timeout, || {
                let store = Arc::clone(&store);
                let key = key.clone();
                let values = values.clone();
                async move { store.set_list(&key, &values).await }
            })
            .await;
            if let Err(e) = result {
                warn!("Buffer commit of '{}' failed: {}", key, e);
                self.stats.store_errors += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::loader::load_str;
    use crate::store::MemoryStore;

    const TWO_LAYER_DOC: &str = r#"
version: 3
rules:
  - name: high_temperature
    conditions:
      all:
        - type: comparison
          sensor: input:temperature
          operator: ">"
          value: 30
    actions:
      - type: set_value
        key: output:high_temperature
        value: true
  - name: heat_alert
    conditions:
      all:
        - type: comparison
          sensor: output:high_temperature
          operator: "=="
          value: true
    actions:
      - type: set_value
        key: output:alert
        value: "HOT"
"#;

    async fn engine_with(doc: &str, store: Arc<MemoryStore>) -> Engine {
        let rule_set = load_str(doc, "test.yaml").unwrap();
        Engine::new(rule_set, EngineConfig::default(), store).unwrap()
    }

    #[tokio::test]
    async fn dependent_layers_resolve_in_one_cycle() {
        let store = Arc::new(MemoryStore::new());
        let mut engine = engine_with(TWO_LAYER_DOC, Arc::clone(&store)).await;
        assert_eq!(engine.layer_count(), 2);

        store.set("input:temperature", Value::Number(35.0)).await.unwrap();
        engine.step(&CancellationToken::new()).await;

        assert_eq!(
            store.get("output:high_temperature").await.unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            store.get("output:alert").await.unwrap(),
            Value::Text("HOT".into())
        );
    }

    #[tokio::test]
    async fn outputs_latch_without_else_branch() {
        let store = Arc::new(MemoryStore::new());
        let mut engine = engine_with(TWO_LAYER_DOC, Arc::clone(&store)).await;
        let cancel = CancellationToken::new();

        store.set("input:temperature", Value::Number(35.0)).await.unwrap();
        engine.step(&cancel).await;
        store.set("input:temperature", Value::Number(25.0)).await.unwrap();
        engine.step(&cancel).await;

        // No else-branch: the earlier value stays
        assert_eq!(
            store.get("output:high_temperature").await.unwrap(),
            Value::Bool(true)
        );
        assert_eq!(engine.stats().cycles_run, 2);
    }

    #[tokio::test]
    async fn buffer_appends_are_bounded_and_committed() {
        let doc = r#"
version: 3
rules:
  - name: track_temps
    conditions:
      all:
        - type: comparison
          sensor: input:temperature
          operator: ">"
          value: 0
    actions:
      - type: buffer_append
        key: buffer:temps
        value_expression: "input:temperature"
        max_items: 3
"#;
        let store = Arc::new(MemoryStore::new());
        let mut engine = engine_with(doc, Arc::clone(&store)).await;
        let cancel = CancellationToken::new();

        for t in 1..=5 {
            store
                .set("input:temperature", Value::Number(f64::from(t)))
                .await
                .unwrap();
            engine.step(&cancel).await;
        }

        let items = store.get_list("buffer:temps").await.unwrap();
        assert_eq!(
            items,
            vec![Value::Number(3.0), Value::Number(4.0), Value::Number(5.0)]
        );
    }

    #[tokio::test]
    async fn run_honors_cancellation() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(TWO_LAYER_DOC, Arc::clone(&store)).await;
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(engine.run(cancel.clone()));

        tokio::time::sleep(std::time::Duration::from_millis(250)).await;
        cancel.cancel();
        let stats = handle.await.unwrap();
        assert!(stats.cycles_run >= 1);
    }
}
