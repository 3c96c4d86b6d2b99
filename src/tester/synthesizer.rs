//! Scenario synthesis
//!
//! Derives black-box test scenarios directly from the rule definitions: for
//! every rule, up to five families: basic positive, basic negative,
//! dependency, temporal, and fallback. Synthesis is pure: the same rule set
//! and cycle period always produce the same document.
//!
//! Value selection follows fixed formulas. For a threshold `T` under `>`
//! the satisfying value is `T + max(5, 0.1·|T|)`, symmetrically for `<`;
//! equality uses `T` exactly. Sensors no condition constrains are filled
//! with the rule's declared default or the neutral constant, so every step
//! populates every referenced sensor and cross-rule interference stays
//! controlled.

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use crate::config::defaults::{
    COMPARISON_MARGIN_FRACTION, COMPARISON_MARGIN_MIN, DEFAULT_EXPECTATION_TIMEOUT_MS,
    DEFAULT_NUMERIC_TOLERANCE, NEUTRAL_SENSOR_VALUE,
};
use crate::eval::expr::CompareOp;
use crate::eval::fallback;
use crate::eval::rule_eval;
use crate::eval::window::WindowStore;
use crate::rules::analyzer::SensorConstraint;
use crate::rules::model::{Action, FallbackStrategy, Rule, RuleSet};
use crate::rules::planner::ExecutionPlan;
use crate::tester::scenario::{
    Expectation, InputWrite, Scenario, ScenarioDocument, Step, Validator,
};
use crate::types::{Kleene, Value};

// ============================================================================
// Output
// ============================================================================

/// The synthesized document plus every warning raised while deriving it.
#[derive(Debug, Default)]
pub struct SynthesisOutput {
    pub document: ScenarioDocument,
    /// Sensors the synthesizer could not solve consistently; the affected
    /// scenarios carry neutral defaults instead.
    pub warnings: Vec<String>,
}

// ============================================================================
// Synthesis
// ============================================================================

/// Derive scenarios for every rule in the set.
pub fn synthesize(
    rule_set: &RuleSet,
    plan: &ExecutionPlan,
    cycle_period_ms: u64,
) -> SynthesisOutput {
    let mut synth = Synthesizer {
        rule_set,
        plan,
        cycle_period_ms,
        warnings: Vec::new(),
    };

    let mut document = ScenarioDocument::default();
    for (idx, rule) in rule_set.rules.iter().enumerate() {
        document.scenarios.extend(synth.basic_positive(idx, rule));
        document.scenarios.extend(synth.basic_negative(idx, rule));
        document.scenarios.extend(synth.dependency(idx, rule));
        document.scenarios.extend(synth.temporal(idx, rule));
        document.scenarios.extend(synth.fallbacks(idx, rule));
    }

    SynthesisOutput {
        document,
        warnings: synth.warnings,
    }
}

struct Synthesizer<'a> {
    rule_set: &'a RuleSet,
    plan: &'a ExecutionPlan,
    cycle_period_ms: u64,
    warnings: Vec<String>,
}

impl Synthesizer<'_> {
    // --- families -------------------------------------------------------

    fn basic_positive(&mut self, idx: usize, rule: &Rule) -> Option<Scenario> {
        let closure = self.producer_closure(idx);
        let inputs = self.satisfying_inputs(&closure, rule);
        let context = self.context_with_outputs(&closure, &inputs);
        let expectations = self.expectations_for(&rule.actions, &context);

        Some(Scenario {
            name: format!("{}_basic_positive", rule.name),
            description: format!(
                "Inputs satisfy every condition of '{}'; its actions fire",
                rule.name
            ),
            clear_outputs: true,
            pre_set_outputs: BTreeMap::new(),
            input_sequence: Vec::new(),
            expected_outputs: BTreeMap::new(),
            steps: vec![Step {
                name: "satisfy_conditions".to_string(),
                inputs: to_input_writes(&inputs),
                delay: self.positive_delay(idx),
                expectations,
            }],
        })
    }

    fn basic_negative(&mut self, idx: usize, rule: &Rule) -> Option<Scenario> {
        let closure = self.producer_closure(idx);
        let mut inputs = self.satisfying_inputs(&closure, rule);

        let constraints = self.input_constraints(idx);
        // Violating one all-child falsifies the conjunction; with only
        // any-children, every disjunct must be violated.
        let to_violate: Vec<&SensorConstraint> =
            match constraints.iter().find(|c| !c.in_any_group) {
                Some(first) => vec![first],
                None => constraints.iter().collect(),
            };
        if to_violate.is_empty() {
            return None;
        }
        for constraint in to_violate {
            match violating_value(constraint.op, &constraint.bound) {
                Some(value) => {
                    inputs.insert(constraint.sensor.clone(), value);
                }
                None => {
                    self.warn(format!(
                        "Rule '{}': no violating value for '{}' {} {:?}",
                        rule.name, constraint.sensor, constraint.op, constraint.bound
                    ));
                    return None;
                }
            }
        }

        // Latching semantics are not assumed: nothing is expected, the
        // scenario only documents that the rule tolerates violating input.
        Some(Scenario {
            name: format!("{}_basic_negative", rule.name),
            description: format!(
                "Inputs violate a condition of '{}'; no outputs are asserted",
                rule.name
            ),
            clear_outputs: true,
            pre_set_outputs: BTreeMap::new(),
            input_sequence: Vec::new(),
            expected_outputs: BTreeMap::new(),
            steps: vec![Step {
                name: "violate_condition".to_string(),
                inputs: to_input_writes(&inputs),
                delay: self.positive_delay(idx),
                expectations: Vec::new(),
            }],
        })
    }

    fn dependency(&mut self, idx: usize, rule: &Rule) -> Option<Scenario> {
        let producers = self.direct_producers(idx);
        if producers.is_empty() {
            return None;
        }
        let closure = self.producer_closure(idx);
        let inputs = self.satisfying_inputs(&closure, rule);
        let context = self.context_with_outputs(&closure, &inputs);

        // Step 1 asserts the producers' outputs; step 2 the target's.
        let mut producer_expectations = Vec::new();
        for &producer_idx in &producers {
            let producer = &self.rule_set.rules[producer_idx];
            producer_expectations
                .extend(self.expectations_for(&producer.actions, &context));
        }
        let target_expectations = self.expectations_for(&rule.actions, &context);

        Some(Scenario {
            name: format!("{}_dependency", rule.name),
            description: format!(
                "Upstream rules produce the outputs '{}' depends on",
                rule.name
            ),
            clear_outputs: true,
            pre_set_outputs: BTreeMap::new(),
            input_sequence: Vec::new(),
            expected_outputs: BTreeMap::new(),
            steps: vec![
                Step {
                    name: "drive_producers".to_string(),
                    inputs: to_input_writes(&inputs),
                    delay: self.positive_delay(idx),
                    expectations: producer_expectations,
                },
                Step {
                    name: format!("evaluate_{}", rule.name),
                    inputs: to_input_writes(&inputs),
                    delay: self.positive_delay(idx),
                    expectations: target_expectations,
                },
            ],
        })
    }

    fn temporal(&mut self, idx: usize, rule: &Rule) -> Option<Scenario> {
        let analysis = &self.plan.analyses[idx];
        if !analysis.has_temporal {
            return None;
        }
        let temporal = analysis
            .constraints
            .iter()
            .find(|c| c.duration_ms.is_some())?
            .clone();
        let duration = temporal.duration_ms.unwrap_or(0);
        let cycle = self.cycle_period_ms;

        let closure = self.producer_closure(idx);
        let satisfying = self.satisfying_inputs(&closure, rule);
        let context = self.context_with_outputs(&closure, &satisfying);
        let then_expect = self.expectations_for(&rule.actions, &context);
        let else_expect = self.expectations_for(&rule.else_actions, &context);

        let mut interrupted = satisfying.clone();
        match violating_value(temporal.op, &temporal.bound) {
            Some(value) => {
                interrupted.insert(temporal.sensor.clone(), value);
            }
            None => {
                self.warn(format!(
                    "Rule '{}': cannot derive an interrupting value for '{}'",
                    rule.name, temporal.sensor
                ));
                return None;
            }
        }
        let mut unavailable = satisfying.clone();
        unavailable.insert(temporal.sensor.clone(), Value::Absent);

        let steps = vec![
            // Hold P for the full duration plus settling margin.
            Step {
                name: "establish".to_string(),
                inputs: to_input_writes(&satisfying),
                delay: duration + 3 * cycle,
                expectations: then_expect.clone(),
            },
            // One counter-sample breaks the window immediately.
            Step {
                name: "interrupt".to_string(),
                inputs: to_input_writes(&interrupted),
                delay: 3 * cycle,
                expectations: else_expect.clone(),
            },
            // Just before the boundary: P again, but not yet for D.
            Step {
                name: "rebuild_below_duration".to_string(),
                inputs: to_input_writes(&satisfying),
                delay: (duration / 2).max(cycle),
                expectations: else_expect,
            },
            // Just after the boundary: D of unbroken P has accumulated.
            Step {
                name: "rebuild_past_duration".to_string(),
                inputs: to_input_writes(&satisfying),
                delay: duration + 3 * cycle,
                expectations: then_expect,
            },
            // Sensor goes missing: the window pauses, nothing is asserted.
            Step {
                name: "sensor_unavailable".to_string(),
                inputs: to_input_writes(&unavailable),
                delay: 3 * cycle,
                expectations: Vec::new(),
            },
        ];

        Some(Scenario {
            name: format!("{}_temporal", rule.name),
            description: format!(
                "Establishment, interruption, boundary, and window pause for '{}'",
                rule.name
            ),
            clear_outputs: true,
            pre_set_outputs: BTreeMap::new(),
            input_sequence: Vec::new(),
            expected_outputs: BTreeMap::new(),
            steps,
        })
    }

    fn fallbacks(&mut self, idx: usize, rule: &Rule) -> Vec<Scenario> {
        let mut scenarios = Vec::new();
        let closure = self.producer_closure(idx);
        let has_temporal = self.plan.analyses[idx].has_temporal;

        for spec in rule.inputs.iter().filter(|s| !s.implicit) {
            let satisfying = self.satisfying_inputs(&closure, rule);
            let mut inputs = satisfying.clone();
            inputs.insert(spec.id.clone(), Value::Absent);

            let scenario = match spec.fallback {
                FallbackStrategy::UseDefault => {
                    let mut substituted = satisfying.clone();
                    if let Some(default) = &spec.default_value {
                        substituted.insert(spec.id.clone(), default.clone());
                    }
                    let expectations = if has_temporal {
                        Vec::new()
                    } else {
                        let context = self.context_with_outputs(&closure, &substituted);
                        match self.static_condition(rule, &substituted) {
                            Some(Kleene::True) => {
                                self.expectations_for(&rule.actions, &context)
                            }
                            Some(_) => self.expectations_for(&rule.else_actions, &context),
                            None => Vec::new(),
                        }
                    };
                    Scenario {
                        name: format!("{}_fallback_default_{}", rule.name, short(&spec.id)),
                        description: format!(
                            "'{}' is absent; '{}' evaluates with its declared default",
                            spec.id, rule.name
                        ),
                        clear_outputs: true,
                        pre_set_outputs: BTreeMap::new(),
                        input_sequence: Vec::new(),
                        expected_outputs: BTreeMap::new(),
                        steps: vec![Step {
                            name: "omit_input".to_string(),
                            inputs: to_input_writes(&inputs),
                            delay: self.positive_delay(idx),
                            expectations,
                        }],
                    }
                }
                FallbackStrategy::PropagateUnavailable => {
                    let context = self.context_with_outputs(&closure, &satisfying);
                    Scenario {
                        name: format!("{}_fallback_propagate_{}", rule.name, short(&spec.id)),
                        description: format!(
                            "'{}' is absent; the condition is indeterminate and the \
                             else-branch of '{}' fires",
                            spec.id, rule.name
                        ),
                        clear_outputs: true,
                        pre_set_outputs: BTreeMap::new(),
                        input_sequence: Vec::new(),
                        expected_outputs: BTreeMap::new(),
                        steps: vec![Step {
                            name: "omit_input".to_string(),
                            inputs: to_input_writes(&inputs),
                            delay: self.positive_delay(idx),
                            expectations: self
                                .expectations_for(&rule.else_actions, &context),
                        }],
                    }
                }
                FallbackStrategy::UseLastKnown => {
                    let max_age = spec.max_age_ms.unwrap_or(0);
                    let gap_delay = 2 * self.cycle_period_ms;
                    if max_age <= gap_delay {
                        self.warn(format!(
                            "Rule '{}': max_age of '{}' ({}ms) is too short to observe \
                             last-known behavior at cycle period {}ms",
                            rule.name, spec.id, max_age, self.cycle_period_ms
                        ));
                        continue;
                    }
                    let context = self.context_with_outputs(&closure, &satisfying);
                    let then_expect = self.expectations_for(&rule.actions, &context);
                    Scenario {
                        name: format!("{}_fallback_last_known_{}", rule.name, short(&spec.id)),
                        description: format!(
                            "'{}' disappears; '{}' keeps using the cached value while \
                             it is fresh",
                            spec.id, rule.name
                        ),
                        clear_outputs: true,
                        pre_set_outputs: BTreeMap::new(),
                        input_sequence: Vec::new(),
                        expected_outputs: BTreeMap::new(),
                        steps: vec![
                            Step {
                                name: "seed_value".to_string(),
                                inputs: to_input_writes(&satisfying),
                                delay: self.positive_delay(idx),
                                expectations: then_expect.clone(),
                            },
                            Step {
                                name: "drop_input".to_string(),
                                inputs: to_input_writes(&inputs),
                                delay: gap_delay,
                                expectations: then_expect,
                            },
                        ],
                    }
                }
                FallbackStrategy::SkipRule => Scenario {
                    name: format!("{}_fallback_skip_{}", rule.name, short(&spec.id)),
                    description: format!(
                        "'{}' is absent; '{}' skips the cycle and writes nothing",
                        spec.id, rule.name
                    ),
                    clear_outputs: true,
                    pre_set_outputs: BTreeMap::new(),
                    input_sequence: Vec::new(),
                    expected_outputs: BTreeMap::new(),
                    steps: vec![Step {
                        name: "omit_input".to_string(),
                        inputs: to_input_writes(&inputs),
                        delay: self.positive_delay(idx),
                        expectations: Vec::new(),
                    }],
                },
            };
            scenarios.push(scenario);
        }
        scenarios
    }

    // --- value selection ------------------------------------------------

    /// Satisfying values for every `input:` sensor any rule in `closure`
    /// constrains, plus neutral/default fill for every other referenced
    /// input sensor.
    fn satisfying_inputs(&mut self, closure: &[usize], rule: &Rule) -> BTreeMap<String, Value> {
        let mut grouped: BTreeMap<&str, Vec<&SensorConstraint>> = BTreeMap::new();
        for &member in closure {
            for constraint in &self.plan.analyses[member].constraints {
                if constraint.sensor.starts_with("input:") {
                    grouped
                        .entry(constraint.sensor.as_str())
                        .or_default()
                        .push(constraint);
                }
            }
        }

        let mut values = BTreeMap::new();
        for (sensor, constraints) in &grouped {
            let solved = solve_satisfying(constraints).or_else(|| {
                // An any-group child may contradict the conjunction; it is
                // enough for the other disjuncts to hold.
                let required: Vec<&SensorConstraint> = constraints
                    .iter()
                    .copied()
                    .filter(|c| !c.in_any_group)
                    .collect();
                solve_satisfying(&required)
            });
            match solved {
                Some(value) => {
                    values.insert((*sensor).to_string(), value);
                }
                None => {
                    self.warn(format!(
                        "Rule '{}': contradictory conditions on '{}', using neutral value",
                        rule.name, sensor
                    ));
                    values.insert((*sensor).to_string(), Value::Number(NEUTRAL_SENSOR_VALUE));
                }
            }
        }

        // Every step populates every sensor referenced anywhere in the
        // rule set, so unrelated rules see controlled values too.
        for sensor in &self.plan.input_keys {
            if values.contains_key(sensor) {
                continue;
            }
            let fill = rule
                .input_spec(sensor)
                .and_then(|spec| spec.default_value.clone())
                .unwrap_or(Value::Number(NEUTRAL_SENSOR_VALUE));
            values.insert(sensor.clone(), fill);
        }

        values
    }

    /// Constraints of one rule restricted to writable `input:` sensors.
    fn input_constraints(&self, idx: usize) -> Vec<SensorConstraint> {
        self.plan.analyses[idx]
            .constraints
            .iter()
            .filter(|c| c.sensor.starts_with("input:"))
            .cloned()
            .collect()
    }

    // --- dependency helpers ---------------------------------------------

    /// Rules directly producing the outputs `idx` references.
    fn direct_producers(&self, idx: usize) -> Vec<usize> {
        let analysis = &self.plan.analyses[idx];
        let mut producers = BTreeSet::new();
        for sensor in analysis
            .referenced_sensors
            .iter()
            .chain(analysis.action_sensors.iter())
        {
            if let Some(&producer) = self.plan.producers.get(sensor) {
                if producer != idx {
                    producers.insert(producer);
                }
            }
        }
        producers.into_iter().collect()
    }

    /// Transitive producer closure, target included, ordered by layer.
    fn producer_closure(&self, idx: usize) -> Vec<usize> {
        let mut members = BTreeSet::new();
        let mut queue = vec![idx];
        while let Some(member) = queue.pop() {
            if !members.insert(member) {
                continue;
            }
            queue.extend(self.direct_producers(member));
        }
        let mut ordered: Vec<usize> = members.into_iter().collect();
        ordered.sort_by_key(|&m| self.plan.layer_of(m).unwrap_or(usize::MAX));
        ordered
    }

    /// Input values plus the outputs the closure's rules are expected to
    /// produce, for evaluating expression-valued actions.
    fn context_with_outputs(
        &self,
        closure: &[usize],
        inputs: &BTreeMap<String, Value>,
    ) -> std::collections::HashMap<String, Value> {
        let mut context: std::collections::HashMap<String, Value> = inputs
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for &member in closure {
            for action in &self.rule_set.rules[member].actions {
                if let Action::SetValue { key, value } = action {
                    let resolved = value.eval(&context);
                    if resolved.is_present() {
                        context.insert(key.to_string(), resolved);
                    }
                }
            }
        }
        context
    }

    // --- expectations ---------------------------------------------------

    fn expectations_for(
        &mut self,
        actions: &[Action],
        context: &std::collections::HashMap<String, Value>,
    ) -> Vec<Expectation> {
        let timeout = self.expectation_timeout();
        let mut expectations = Vec::new();
        for action in actions {
            let Action::SetValue { key, value } = action else {
                continue;
            };
            let expectation = match value {
                crate::eval::expr::Expr::Literal(literal) if literal.is_present() => {
                    let mut e = Expectation::for_value(key.to_string(), literal.clone());
                    if e.validator == Validator::Numeric {
                        e.tolerance = Some(DEFAULT_NUMERIC_TOLERANCE);
                    }
                    e
                }
                expr => {
                    let resolved = expr.eval(context);
                    if resolved.is_absent() {
                        self.warn(format!(
                            "Cannot pre-compute expected value for '{key}', skipping expectation"
                        ));
                        continue;
                    }
                    let tolerance = matches!(resolved, Value::Number(_))
                        .then_some(DEFAULT_NUMERIC_TOLERANCE);
                    Expectation {
                        key: key.to_string(),
                        expected: resolved,
                        validator: Validator::Evalresult,
                        timeout_ms: Some(timeout),
                        tolerance,
                    }
                }
            };
            expectations.push(Expectation {
                timeout_ms: Some(timeout),
                ..expectation
            });
        }
        expectations
    }

    /// Evaluate a non-temporal rule's condition against a fixed assignment.
    fn static_condition(
        &self,
        rule: &Rule,
        values: &BTreeMap<String, Value>,
    ) -> Option<Kleene> {
        let visible: std::collections::HashMap<String, Value> = values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let windows = WindowStore::new(self.cycle_period_ms);
        let ctx = fallback::resolve(rule, &visible, &windows, 0);
        if ctx.skip {
            return None;
        }
        Some(rule_eval::eval_condition(&rule.condition, &ctx, &windows, 0))
    }

    // --- timing ---------------------------------------------------------

    /// Delay long enough for the whole producer chain to settle, plus the
    /// rule's own temporal duration if it has one.
    fn positive_delay(&self, idx: usize) -> u64 {
        let base = 3 * self.cycle_period_ms;
        base + self.plan.analyses[idx].max_duration_ms
    }

    fn expectation_timeout(&self) -> u64 {
        DEFAULT_EXPECTATION_TIMEOUT_MS.max(5 * self.cycle_period_ms)
    }

    fn warn(&mut self, message: String) {
        warn!("{}", message);
        self.warnings.push(message);
    }
}

// ============================================================================
// Value Selection
// ============================================================================

fn margin(threshold: f64) -> f64 {
    COMPARISON_MARGIN_MIN.max(COMPARISON_MARGIN_FRACTION * threshold.abs())
}

/// A value violating a single comparison.
fn violating_value(op: CompareOp, bound: &Value) -> Option<Value> {
    match bound {
        Value::Number(t) => {
            let value = match op {
                CompareOp::Gt | CompareOp::Ge => t - margin(*t),
                CompareOp::Lt | CompareOp::Le => t + margin(*t),
                CompareOp::Eq => t + margin(*t),
                CompareOp::Ne => *t,
            };
            Some(Value::Number(value))
        }
        Value::Bool(b) => Some(Value::Bool(match op {
            CompareOp::Ne => *b,
            _ => !*b,
        })),
        Value::Text(s) => match op {
            CompareOp::Eq => Some(Value::Text(format!("not_{s}"))),
            CompareOp::Ne => Some(Value::Text(s.clone())),
            _ => None,
        },
        Value::Absent => None,
    }
}

/// Solve the conjunction of comparisons on one sensor, or report that it
/// is contradictory.
fn solve_satisfying(constraints: &[&SensorConstraint]) -> Option<Value> {
    if constraints.is_empty() {
        return Some(Value::Number(NEUTRAL_SENSOR_VALUE));
    }

    // Non-numeric bounds: all equality-style constraints must agree.
    if let Value::Bool(_) | Value::Text(_) = constraints[0].bound {
        let mut required: Option<Value> = None;
        for constraint in constraints {
            let candidate = match (&constraint.bound, constraint.op) {
                (Value::Bool(b), CompareOp::Eq) => Value::Bool(*b),
                (Value::Bool(b), CompareOp::Ne) => Value::Bool(!*b),
                (Value::Text(s), CompareOp::Eq) => Value::Text(s.clone()),
                (Value::Text(s), CompareOp::Ne) => Value::Text(format!("not_{s}")),
                _ => return None,
            };
            match &required {
                Some(existing) if *existing != candidate => return None,
                _ => required = Some(candidate),
            }
        }
        return required;
    }

    // Numeric bounds: intersect the implied interval.
    let mut lower: Option<f64> = None;
    let mut upper: Option<f64> = None;
    let mut pinned: Option<f64> = None;
    let mut excluded: Vec<f64> = Vec::new();
    for constraint in constraints {
        let t = constraint.bound.as_number()?;
        match constraint.op {
            CompareOp::Gt => lower = Some(lower.map_or(t + margin(t), |l| l.max(t + margin(t)))),
            CompareOp::Ge => lower = Some(lower.map_or(t, |l| l.max(t))),
            CompareOp::Lt => upper = Some(upper.map_or(t - margin(t), |u| u.min(t - margin(t)))),
            CompareOp::Le => upper = Some(upper.map_or(t, |u| u.min(t))),
            CompareOp::Eq => match pinned {
                Some(existing) if (existing - t).abs() > f64::EPSILON => return None,
                _ => pinned = Some(t),
            },
            CompareOp::Ne => excluded.push(t),
        }
    }

    let mut candidate = match (pinned, lower, upper) {
        (Some(eq), lo, hi) => {
            if lo.is_some_and(|l| eq < l) || hi.is_some_and(|h| eq > h) {
                return None;
            }
            eq
        }
        (None, Some(lo), Some(hi)) => {
            if lo > hi {
                return None;
            }
            (lo + hi) / 2.0
        }
        (None, Some(lo), None) => lo,
        (None, None, Some(hi)) => hi,
        (None, None, None) => NEUTRAL_SENSOR_VALUE,
    };

    // Dodge != exclusions while staying inside the interval.
    for _ in 0..excluded.len() + 1 {
        if excluded.iter().all(|x| (candidate - x).abs() > f64::EPSILON) {
            break;
        }
        let bumped = candidate + margin(candidate);
        if pinned.is_some() || upper.is_some_and(|u| bumped > u) {
            return None;
        }
        candidate = bumped;
    }

    Some(Value::Number(candidate))
}

fn to_input_writes(values: &BTreeMap<String, Value>) -> Vec<InputWrite> {
    values
        .iter()
        .map(|(key, value)| InputWrite::new(key.clone(), value.clone()))
        .collect()
}

/// Short name for scenario ids: drop the namespace prefix.
fn short(sensor: &str) -> &str {
    sensor.split_once(':').map_or(sensor, |(_, name)| name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::loader::load_str;
    use crate::rules::planner::plan;

    const DOC: &str = r#"
version: 3
rules:
  - name: high_temperature
    inputs:
      - id: input:temperature
        fallback: propagate_unavailable
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
    else_actions:
      - type: set_value
        key: output:high_temperature
        value: false
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
  - name: sustained_hot
    conditions:
      all:
        - type: threshold_over_time
          sensor: input:temperature
          operator: ">"
          threshold: 100
          duration: 1000
    actions:
      - type: set_value
        key: output:sustained_hot
        value: true
"#;

    fn synth() -> SynthesisOutput {
        let set = load_str(DOC, "test.yaml").unwrap();
        let plan = plan(&set, 100).unwrap();
        synthesize(&set, &plan, 100)
    }

    fn scenario<'a>(out: &'a SynthesisOutput, name: &str) -> &'a Scenario {
        out.document
            .scenarios
            .iter()
            .find(|s| s.name == name)
            .unwrap_or_else(|| panic!("missing scenario '{name}'"))
    }

    #[test]
    fn positive_scenario_uses_threshold_margin() {
        let out = synth();
        let positive = scenario(&out, "high_temperature_basic_positive");
        let step = &positive.steps[0];
        let temp = step
            .inputs
            .iter()
            .find(|i| i.key == "input:temperature")
            .unwrap();
        // T + max(5, 0.1*|T|) = 30 + 5 = 35
        assert_eq!(temp.value, Value::Number(35.0));
        assert_eq!(step.expectations[0].key, "output:high_temperature");
        assert_eq!(step.expectations[0].expected, Value::Bool(true));
        assert_eq!(step.expectations[0].validator, Validator::Boolean);
    }

    #[test]
    fn negative_scenario_violates_and_expects_nothing() {
        let out = synth();
        let negative = scenario(&out, "high_temperature_basic_negative");
        let step = &negative.steps[0];
        let temp = step
            .inputs
            .iter()
            .find(|i| i.key == "input:temperature")
            .unwrap();
        assert_eq!(temp.value, Value::Number(25.0));
        assert!(step.expectations.is_empty());
        assert!(negative.clear_outputs);
    }

    #[test]
    fn dependency_scenario_drives_the_producer_first() {
        let out = synth();
        let dep = scenario(&out, "heat_alert_dependency");
        assert_eq!(dep.steps.len(), 2);
        assert_eq!(dep.steps[0].name, "drive_producers");
        assert_eq!(
            dep.steps[0].expectations[0].key,
            "output:high_temperature"
        );
        assert_eq!(dep.steps[1].expectations[0].key, "output:alert");
        assert_eq!(
            dep.steps[1].expectations[0].expected,
            Value::Text("HOT".into())
        );
    }

    #[test]
    fn every_step_populates_every_referenced_input() {
        let out = synth();
        for scenario in &out.document.scenarios {
            for step in &scenario.steps {
                let keys: Vec<&str> = step.inputs.iter().map(|i| i.key.as_str()).collect();
                assert!(
                    keys.contains(&"input:temperature"),
                    "step '{}' of '{}' misses input:temperature",
                    step.name,
                    scenario.name
                );
            }
        }
    }

    #[test]
    fn temporal_scenario_has_the_full_arc() {
        let out = synth();
        let temporal = scenario(&out, "sustained_hot_temporal");
        let names: Vec<&str> = temporal.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "establish",
                "interrupt",
                "rebuild_below_duration",
                "rebuild_past_duration",
                "sensor_unavailable"
            ]
        );
        // Establishment waits at least the sustained duration.
        assert!(temporal.steps[0].delay >= 1000);
        // Rebuild-below stays under the duration.
        assert!(temporal.steps[2].delay < 1000);
        // The pause step writes the sensor away.
        let gap = &temporal.steps[4];
        let temp = gap
            .inputs
            .iter()
            .find(|i| i.key == "input:temperature")
            .unwrap();
        assert_eq!(temp.value, Value::Absent);
    }

    #[test]
    fn fallback_propagate_expects_else_branch() {
        let out = synth();
        let fb = scenario(&out, "high_temperature_fallback_propagate_temperature");
        let step = &fb.steps[0];
        let temp = step
            .inputs
            .iter()
            .find(|i| i.key == "input:temperature")
            .unwrap();
        assert_eq!(temp.value, Value::Absent);
        assert_eq!(step.expectations[0].expected, Value::Bool(false));
    }

    #[test]
    fn synthesis_is_deterministic() {
        let a = synth();
        let b = synth();
        let json_a = serde_json::to_string(&a.document).unwrap();
        let json_b = serde_json::to_string(&b.document).unwrap();
        assert_eq!(json_a, json_b);
    }

    #[test]
    fn contradictory_conditions_warn_and_use_neutral() {
        let doc = r#"
version: 3
rules:
  - name: impossible
    conditions:
      all:
        - type: comparison
          sensor: input:x
          operator: ">"
          value: 100
        - type: comparison
          sensor: input:x
          operator: "<"
          value: 0
    actions:
      - type: set_value
        key: output:never
        value: true
"#;
        let set = load_str(doc, "test.yaml").unwrap();
        let p = plan(&set, 100).unwrap();
        let out = synthesize(&set, &p, 100);
        assert!(!out.warnings.is_empty());
        let positive = out
            .document
            .scenarios
            .iter()
            .find(|s| s.name == "impossible_basic_positive")
            .unwrap();
        let x = positive.steps[0]
            .inputs
            .iter()
            .find(|i| i.key == "input:x")
            .unwrap();
        assert_eq!(x.value, Value::Number(NEUTRAL_SENSOR_VALUE));
    }
}
