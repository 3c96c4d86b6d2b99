//! Per-input fallback resolution
//!
//! Before a rule is evaluated, each declared input resolves to a concrete
//! value (or stays Absent) according to its strategy. Resolution runs once
//! per rule per cycle against the immutable snapshot; for fixed inputs and
//! store contents it is a pure function of the strategies.

use std::collections::HashMap;

use crate::eval::expr::ValueSource;
use crate::eval::window::WindowStore;
use crate::rules::model::{FallbackStrategy, Rule};
use crate::types::Value;

/// The rule's view of the world for one cycle, after fallback resolution.
#[derive(Debug, Default)]
pub struct ResolvedContext {
    values: HashMap<String, Value>,
    /// Substitute values produced by fallbacks for sensors whose snapshot
    /// reading was Absent; consulted when temporal windows bridge gaps.
    gaps: HashMap<String, Value>,
    /// True when a skip_rule input was missing: the rule emits nothing.
    pub skip: bool,
}

impl ResolvedContext {
    pub fn gap_value(&self, sensor: &str) -> Option<&Value> {
        self.gaps.get(sensor)
    }

    #[cfg(test)]
    pub fn get(&self, sensor: &str) -> Value {
        self.value(sensor)
    }
}

impl ValueSource for ResolvedContext {
    fn value(&self, key: &str) -> Value {
        self.values.get(key).cloned().unwrap_or(Value::Absent)
    }
}

/// Resolve every declared input of `rule` against the visible cycle state.
///
/// `visible` is the snapshot plus outputs accumulated from earlier layers;
/// `windows` supplies the last-present cursor for `use_last_known`.
pub fn resolve(
    rule: &Rule,
    visible: &dyn ValueSource,
    windows: &WindowStore,
    now_ms: u64,
) -> ResolvedContext {
    let mut ctx = ResolvedContext::default();

    for spec in &rule.inputs {
        let observed = visible.value(&spec.id);
        if observed.is_present() {
            ctx.values.insert(spec.id.clone(), observed);
            continue;
        }

        let substituted = match spec.fallback {
            FallbackStrategy::UseDefault => spec.default_value.clone(),
            FallbackStrategy::UseLastKnown => windows.last_present(&spec.id).and_then(
                |(seen_at, value)| {
                    let age = now_ms.saturating_sub(seen_at);
                    match spec.max_age_ms {
                        Some(max_age) if age > max_age => None,
                        _ => Some(value),
                    }
                },
            ),
            FallbackStrategy::PropagateUnavailable => None,
            FallbackStrategy::SkipRule => {
                ctx.skip = true;
                None
            }
        };

        match substituted {
            Some(value) => {
                ctx.gaps.insert(spec.id.clone(), value.clone());
                ctx.values.insert(spec.id.clone(), value);
            }
            None => {
                ctx.values.insert(spec.id.clone(), Value::Absent);
            }
        }
    }

    ctx
}
