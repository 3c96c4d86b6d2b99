//! Scenario and result documents
//!
//! JSON wire types shared by the synthesizer (writes scenarios), the
//! runner (reads scenarios, writes results), and the report renderer
//! (reads results). Field names are camelCase on the wire.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::Value;

// ============================================================================
// Scenario Documents
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioDocument {
    pub scenarios: Vec<Scenario>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Scenario {
    pub name: String,
    pub description: String,
    /// Reset `output:` and `buffer:` keys before the first step, so
    /// latched outputs from earlier scenarios cannot leak in.
    pub clear_outputs: bool,
    /// Outputs seeded before the first step.
    pub pre_set_outputs: BTreeMap<String, Value>,
    pub steps: Vec<Step>,
    /// Compact legacy form: one map of input writes per implied step.
    /// Carried through documents verbatim; execution drives `steps`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub input_sequence: Vec<BTreeMap<String, Value>>,
    /// Compact legacy form: expected key/value states after the sequence.
    /// Pass-through data, like `input_sequence`.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub expected_outputs: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Step {
    pub name: String,
    pub inputs: Vec<InputWrite>,
    /// Minimum wait after writing inputs, in milliseconds (scaled by the
    /// runner's delay multiplier).
    pub delay: u64,
    pub expectations: Vec<Expectation>,
}

/// One key written at the start of a step. Writing `null` removes the key,
/// which is how scenarios make a sensor unavailable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputWrite {
    pub key: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl InputWrite {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
            format: None,
            field: None,
        }
    }
}

/// How an expected value is compared against the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Validator {
    /// Exact boolean match after normalizing the strings "true"/"false".
    Boolean,
    /// Numeric match within tolerance.
    Numeric,
    /// Exact string match.
    String,
    /// Type-aware match for values derived by evaluating an action
    /// expression: booleans exact, numbers within tolerance, strings exact.
    Evalresult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expectation {
    pub key: String,
    pub expected: Value,
    pub validator: Validator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<f64>,
}

impl Expectation {
    /// Pick the validator that matches the expected value's type.
    pub fn for_value(key: impl Into<String>, expected: Value) -> Self {
        let validator = match &expected {
            Value::Bool(_) => Validator::Boolean,
            Value::Number(_) => Validator::Numeric,
            Value::Text(_) | Value::Absent => Validator::String,
        };
        Self {
            key: key.into(),
            expected,
            validator,
            timeout_ms: None,
            tolerance: None,
        }
    }
}

// ============================================================================
// Result Documents
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultDocument {
    pub results: Vec<ScenarioResult>,
}

impl ResultDocument {
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.success)
    }

    pub fn passed_count(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.len() - self.passed_count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioResult {
    pub name: String,
    pub success: bool,
    /// Wall-clock duration of the scenario, in milliseconds.
    pub duration: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub step_results: Vec<StepResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub name: String,
    pub success: bool,
    pub expectation_results: Vec<ExpectationResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpectationResult {
    pub key: String,
    pub expected: Value,
    pub actual: Value,
    pub success: bool,
}
