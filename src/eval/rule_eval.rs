//! Per-rule, per-cycle evaluation
//!
//! Ties the pieces together for one rule in one cycle: fallback resolution,
//! condition evaluation (expressions plus temporal windows), branch
//! selection, and action emission with emit-policy gating. The evaluator
//! mutates nothing shared: it returns the writes it wants, and the
//! orchestrator folds them into the cycle.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::eval::expr::ValueSource;
use crate::eval::fallback::{self, ResolvedContext};
use crate::eval::window::WindowStore;
use crate::rules::model::{Action, Condition, EmitPolicy, Rule};
use crate::types::{Kleene, SensorKey, Value};

// ============================================================================
// Outcome
// ============================================================================

/// A buffered append requested by a rule this cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferWrite {
    pub key: SensorKey,
    pub value: Value,
    pub max_items: usize,
}

/// Everything one rule emitted in one cycle.
#[derive(Debug, Default)]
pub struct RuleOutcome {
    /// Three-valued condition result; None when a skip_rule input was absent.
    pub condition: Option<Kleene>,
    pub writes: Vec<(SensorKey, Value)>,
    pub buffer_writes: Vec<BufferWrite>,
    pub log_lines: Vec<String>,
}

/// Cross-cycle state the emit policies need, one per rule.
#[derive(Debug, Default)]
pub struct RuleRuntime {
    /// Whether the previous evaluated cycle took the then-branch.
    last_then: Option<bool>,
    /// Last value appended per buffer key, for on_change gating.
    last_appended: HashMap<String, Value>,
}

// ============================================================================
// Evaluation
// ============================================================================

/// Evaluate one rule against the visible cycle state.
pub fn evaluate(
    rule: &Rule,
    visible: &dyn ValueSource,
    windows: &WindowStore,
    now_ms: u64,
    runtime: &mut RuleRuntime,
) -> RuleOutcome {
    let ctx = fallback::resolve(rule, visible, windows, now_ms);
    if ctx.skip {
        debug!("Rule '{}': required input absent, skipping cycle", rule.name);
        return RuleOutcome::default();
    }

    let condition = eval_condition(&rule.condition, &ctx, windows, now_ms);

    // Indeterminate is "not taken" for the then-branch.
    let then_taken = condition == Kleene::True;
    let entered = runtime.last_then != Some(then_taken);
    runtime.last_then = Some(then_taken);

    let branch = if then_taken {
        &rule.actions
    } else {
        &rule.else_actions
    };

    let mut outcome = RuleOutcome {
        condition: Some(condition),
        ..RuleOutcome::default()
    };

    for action in branch {
        dispatch(rule, action, &ctx, entered, runtime, &mut outcome);
    }

    outcome
}

/// Evaluate a condition tree to a Kleene value.
///
/// Group semantics: Kleene-AND over `all`, Kleene-OR over `any`; when both
/// are present the group is the AND of the two results.
pub fn eval_condition(
    condition: &Condition,
    ctx: &ResolvedContext,
    windows: &WindowStore,
    now_ms: u64,
) -> Kleene {
    match condition {
        Condition::Comparison { sensor, op, rhs } => {
            op.apply(&ctx.value(sensor), &rhs.eval(ctx))
        }
        Condition::ThresholdOverTime {
            sensor,
            op,
            threshold,
            duration_ms,
        } => windows.sustained(
            sensor,
            *op,
            *threshold,
            *duration_ms,
            now_ms,
            ctx.gap_value(sensor),
        ),
        Condition::Expression(expr) => expr.eval_kleene(ctx),
        Condition::Group { all, any } => {
            let all_result = all
                .iter()
                .map(|c| eval_condition(c, ctx, windows, now_ms))
                .reduce(Kleene::and);
            let any_result = any
                .iter()
                .map(|c| eval_condition(c, ctx, windows, now_ms))
                .reduce(Kleene::or);
            match (all_result, any_result) {
                (Some(a), Some(b)) => a.and(b),
                (Some(a), None) => a,
                (None, Some(b)) => b,
                // Empty groups are rejected at load; an empty tree here
                // means a rule with no condition constraints at all.
                (None, None) => Kleene::True,
            }
        }
    }
}

fn dispatch(
    rule: &Rule,
    action: &Action,
    ctx: &ResolvedContext,
    entered: bool,
    runtime: &mut RuleRuntime,
    outcome: &mut RuleOutcome,
) {
    match action {
        Action::SetValue { key, value } => {
            let resolved = value.eval(ctx);
            if resolved.is_absent() {
                debug!(
                    "Rule '{}': value for '{}' resolved to Absent, not written",
                    rule.name, key
                );
                return;
            }
            outcome.writes.push((key.clone(), resolved));
        }
        Action::BufferAppend {
            key,
            value,
            max_items,
            emit,
        } => {
            let resolved = value.eval(ctx);
            if resolved.is_absent() {
                debug!(
                    "Rule '{}': buffer value for '{}' resolved to Absent, not appended",
                    rule.name, key
                );
                return;
            }
            if !should_emit(*emit, entered, runtime.last_appended.get(&key.to_string()), &resolved) {
                return;
            }
            runtime
                .last_appended
                .insert(key.to_string(), resolved.clone());
            outcome.buffer_writes.push(BufferWrite {
                key: key.clone(),
                value: resolved,
                max_items: *max_items,
            });
        }
        Action::Log { template, emit } => {
            let rendered = template.eval(ctx).render();
            if !should_emit(*emit, entered, None, &Value::Text(rendered.clone())) {
                return;
            }
            info!(rule = %rule.name, "{}", rendered);
            outcome.log_lines.push(rendered);
        }
    }
}

fn should_emit(policy: EmitPolicy, entered: bool, previous: Option<&Value>, new: &Value) -> bool {
    match policy {
        EmitPolicy::Always => true,
        EmitPolicy::OnEnter => entered,
        EmitPolicy::OnChange => previous != Some(new),
    }
}
