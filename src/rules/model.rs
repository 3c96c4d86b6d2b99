//! Rule AST
//!
//! In-memory model of a loaded rule set: rules, input specs with fallback
//! strategies, the condition tree, and actions. Rules are immutable after
//! load; every consumer (analyzer, planner, evaluator, synthesizer) works
//! from this one representation.

use serde::{Deserialize, Serialize};

use crate::eval::expr::{CompareOp, Expr};
use crate::types::{SensorKey, Value};

// ============================================================================
// Input Specs & Fallback Strategies
// ============================================================================

/// Policy for resolving an input that is missing from the cycle snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStrategy {
    /// Substitute the declared `default_value`.
    UseDefault,
    /// Substitute the last seen value if it is younger than `max_age`.
    UseLastKnown,
    /// Leave the value Absent; conditions evaluate under Kleene logic.
    PropagateUnavailable,
    /// The rule emits nothing this cycle (neither branch).
    SkipRule,
}

/// One declared input of a rule.
#[derive(Debug, Clone, PartialEq)]
pub struct InputSpec {
    /// Full sensor key, e.g. `input:temperature` or `output:high_temperature`.
    pub id: String,
    pub fallback: FallbackStrategy,
    /// Required when `fallback` is `UseDefault`.
    pub default_value: Option<Value>,
    /// Staleness bound for `UseLastKnown`, in milliseconds.
    pub max_age_ms: Option<u64>,
    /// True when the spec was derived from a condition reference rather
    /// than declared in the rule document.
    pub implicit: bool,
}

impl InputSpec {
    /// An implicitly-declared input: referenced in a condition but not
    /// listed in the rule document. Absence propagates.
    pub fn implicit(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fallback: FallbackStrategy::PropagateUnavailable,
            default_value: None,
            max_age_ms: None,
            implicit: true,
        }
    }
}

// ============================================================================
// Conditions
// ============================================================================

/// A node in the condition tree.
///
/// A tagged sum with an explicit discriminator rather than trait objects:
/// every consumer dispatches with a `match`, and shared traversal goes
/// through [`crate::rules::analyzer::walk`].
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `sensor <op> rhs`, where the right-hand side may be any expression.
    Comparison {
        sensor: String,
        op: CompareOp,
        rhs: Expr,
    },
    /// `sensor <op> threshold` held continuously for `duration_ms`.
    ThresholdOverTime {
        sensor: String,
        op: CompareOp,
        threshold: f64,
        duration_ms: u64,
    },
    /// Arbitrary boolean expression over sensors and literals.
    Expression(Expr),
    /// Kleene-AND over `all`, Kleene-OR over `any`; both present means
    /// AND(all-conjunction, any-disjunction).
    Group {
        all: Vec<Condition>,
        any: Vec<Condition>,
    },
}

// ============================================================================
// Actions
// ============================================================================

/// When a buffered or logged emission actually happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmitPolicy {
    /// Every cycle the owning branch fires.
    Always,
    /// Only when the new value differs from the previous one.
    OnChange,
    /// Only on the cycle the condition transitions into the branch.
    OnEnter,
}

/// An action emitted by a rule branch.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Write a value to an `output:` key.
    SetValue { key: SensorKey, value: Expr },
    /// Append to a rolling `buffer:` history, bounded to `max_items`.
    BufferAppend {
        key: SensorKey,
        value: Expr,
        max_items: usize,
        emit: EmitPolicy,
    },
    /// Render a template and emit it through the logging layer.
    Log { template: Expr, emit: EmitPolicy },
}

impl Action {
    /// The `output:` key this action produces, if any.
    pub fn produced_output(&self) -> Option<&SensorKey> {
        match self {
            Action::SetValue { key, .. } => Some(key),
            Action::BufferAppend { .. } | Action::Log { .. } => None,
        }
    }
}

// ============================================================================
// Rules
// ============================================================================

/// A single declarative rule. Immutable after load.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub name: String,
    pub description: String,
    pub inputs: Vec<InputSpec>,
    pub condition: Condition,
    pub actions: Vec<Action>,
    pub else_actions: Vec<Action>,
    /// Provenance for diagnostics.
    pub source_file: String,
    pub source_line: usize,
}

impl Rule {
    /// Look up the declared spec for a sensor key.
    pub fn input_spec(&self, id: &str) -> Option<&InputSpec> {
        self.inputs.iter().find(|spec| spec.id == id)
    }

    /// All actions of both branches.
    pub fn all_actions(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter().chain(self.else_actions.iter())
    }
}

/// A validated, loaded rule set.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    pub rules: Vec<Rule>,
    pub source_file: String,
}

impl RuleSet {
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rule_by_name(&self, name: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.name == name)
    }
}
