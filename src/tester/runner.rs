//! Scenario execution
//!
//! Drives a running engine through the shared key/value store: write a
//! step's inputs, wait out the (scaled) delay, then poll each expected key
//! until it matches or its timeout elapses. A failed expectation fails the
//! step, a failed step fails the scenario, but execution always continues
//! so the report enumerates every failure.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::defaults::{DEFAULT_EXPECTATION_TIMEOUT_MS, DEFAULT_NUMERIC_TOLERANCE, EXPECTATION_POLL_INTERVAL_MS};
use crate::config::TesterConfig;
use crate::store::SensorStore;
use crate::tester::scenario::{
    Expectation, ExpectationResult, ResultDocument, Scenario, ScenarioDocument, ScenarioResult,
    Step, StepResult, Validator,
};
use crate::types::Value;

// ============================================================================
// Runner
// ============================================================================

/// Executes scenario documents against a store the engine is also watching.
/// Scenarios run sequentially; steps within a scenario run in order.
pub struct ScenarioRunner {
    store: Arc<dyn SensorStore>,
    config: TesterConfig,
}

impl ScenarioRunner {
    pub fn new(store: Arc<dyn SensorStore>, config: TesterConfig) -> Self {
        Self { store, config }
    }

    /// Run every scenario in the document, in order.
    pub async fn run_document(&self, document: &ScenarioDocument) -> ResultDocument {
        let mut results = ResultDocument::default();
        for scenario in &document.scenarios {
            info!("Running scenario '{}'", scenario.name);
            let result = self.run_scenario(scenario).await;
            if result.success {
                info!("  PASS ({} ms)", result.duration);
            } else {
                warn!(
                    "  FAIL ({} ms): {}",
                    result.duration,
                    result.error_message.as_deref().unwrap_or("expectation mismatch")
                );
            }
            results.results.push(result);
        }
        results
    }

    pub async fn run_scenario(&self, scenario: &Scenario) -> ScenarioResult {
        let started = tokio::time::Instant::now();
        let mut step_results = Vec::with_capacity(scenario.steps.len());
        let mut error_message = None;

        if scenario.clear_outputs {
            if let Err(e) = self.clear_outputs().await {
                error_message = Some(format!("failed to clear outputs: {e}"));
            }
        }
        for (key, value) in &scenario.pre_set_outputs {
            if let Err(e) = self.store.set(key, value.clone()).await {
                error_message = Some(format!("failed to pre-set '{key}': {e}"));
            }
        }

        for step in &scenario.steps {
            let result = self.run_step(step).await;
            if !result.success && error_message.is_none() {
                error_message = Some(format!("step '{}' failed", step.name));
            }
            step_results.push(result);
        }

        ScenarioResult {
            name: scenario.name.clone(),
            success: error_message.is_none() && step_results.iter().all(|s| s.success),
            duration: started.elapsed().as_millis() as u64,
            error_message,
            step_results,
        }
    }

    async fn run_step(&self, step: &Step) -> StepResult {
        debug!("Step '{}': writing {} input(s)", step.name, step.inputs.len());
        for input in &step.inputs {
            // Writing Absent removes the key: that is how a scenario takes
            // a sensor away from the engine.
            let result = if input.value.is_absent() {
                self.store.remove(&input.key).await
            } else {
                self.store.set(&input.key, input.value.clone()).await
            };
            if let Err(e) = result {
                warn!("Step '{}': write of '{}' failed: {}", step.name, input.key, e);
            }
        }

        let delay = scale(step.delay, self.config.delay_scale());
        tokio::time::sleep(std::time::Duration::from_millis(delay)).await;

        let mut expectation_results = Vec::with_capacity(step.expectations.len());
        for expectation in &step.expectations {
            expectation_results.push(self.await_expectation(expectation).await);
        }

        StepResult {
            name: step.name.clone(),
            success: expectation_results.iter().all(|e| e.success),
            expectation_results,
        }
    }

    /// Poll one key until its value matches or the (scaled) timeout elapses.
    async fn await_expectation(&self, expectation: &Expectation) -> ExpectationResult {
        let timeout_ms = scale(
            expectation
                .timeout_ms
                .unwrap_or(DEFAULT_EXPECTATION_TIMEOUT_MS),
            self.config.timeout_scale(),
        );
        let deadline =
            tokio::time::Instant::now() + std::time::Duration::from_millis(timeout_ms);
        let poll = std::time::Duration::from_millis(EXPECTATION_POLL_INTERVAL_MS);

        let mut actual = Value::Absent;
        loop {
            match self.store.get(&expectation.key).await {
                Ok(value) => actual = value,
                Err(e) => warn!("Poll of '{}' failed: {}", expectation.key, e),
            }
            if matches(expectation, &actual) {
                return ExpectationResult {
                    key: expectation.key.clone(),
                    expected: expectation.expected.clone(),
                    actual,
                    success: true,
                };
            }
            if tokio::time::Instant::now() >= deadline {
                return ExpectationResult {
                    key: expectation.key.clone(),
                    expected: expectation.expected.clone(),
                    actual,
                    success: false,
                };
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Remove every `output:` and `buffer:` key, so latched state from a
    /// previous scenario cannot satisfy this one.
    async fn clear_outputs(&self) -> Result<(), crate::store::StoreError> {
        let pattern = regex::Regex::new("^(output|buffer):")
            .map_err(|e| crate::store::StoreError::Backend(e.to_string()))?;
        for key in self.store.keys_matching(&pattern).await? {
            self.store.remove(&key).await?;
        }
        Ok(())
    }
}

// ============================================================================
// Matching
// ============================================================================

fn scale(ms: u64, factor: f64) -> u64 {
    (ms as f64 * factor).round() as u64
}

/// Type-aware comparison between an expected and an observed value.
fn matches(expectation: &Expectation, actual: &Value) -> bool {
    let tolerance = expectation.tolerance.unwrap_or(DEFAULT_NUMERIC_TOLERANCE);
    match expectation.validator {
        Validator::Boolean => match (as_bool(&expectation.expected), as_bool(actual)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
        Validator::Numeric => match (expectation.expected.as_number(), actual.as_number()) {
            (Some(a), Some(b)) => (a - b).abs() <= tolerance,
            _ => false,
        },
        Validator::String => match (&expectation.expected, actual) {
            (Value::Text(a), Value::Text(b)) => a == b,
            _ => false,
        },
        Validator::Evalresult => match (&expectation.expected, actual) {
            (Value::Number(a), Value::Number(b)) => (a - b).abs() <= tolerance,
            (Value::Text(a), Value::Text(b)) => a == b,
            (expected, actual) => match (as_bool(expected), as_bool(actual)) {
                (Some(a), Some(b)) => a == b,
                _ => expected == actual,
            },
        },
    }
}

/// Booleans compare exactly after normalizing the strings "true"/"false".
fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Text(s) if s == "true" => Some(true),
        Value::Text(s) if s == "false" => Some(false),
        _ => None,
    }
}
