//! Condition analysis
//!
//! Walks a rule's condition tree once and answers the questions every other
//! component keeps asking: which sensors does it read, which outputs does it
//! produce, does it use temporal operators, and what per-sensor comparisons
//! appear (the synthesizer generates satisfying and violating values from
//! those).

use std::collections::BTreeSet;

use thiserror::Error;

use crate::eval::expr::{CompareOp, Expr};
use crate::rules::model::{Condition, Rule};
use crate::types::Value;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AnalyzerError {
    #[error("Rule '{0}': group condition has neither 'all' nor 'any'")]
    EmptyGroup(String),
}

// ============================================================================
// Traversal
// ============================================================================

/// Pre-order traversal of a condition tree.
///
/// The single traversal helper: analyzer, evaluator, and synthesizer all
/// dispatch on nodes delivered by this walk rather than re-implementing
/// recursion over groups.
pub fn walk<'a>(condition: &'a Condition, visit: &mut impl FnMut(&'a Condition)) {
    visit(condition);
    if let Condition::Group { all, any } = condition {
        for child in all.iter().chain(any.iter()) {
            walk(child, visit);
        }
    }
}

// ============================================================================
// Analysis
// ============================================================================

/// One comparison occurrence against a statically-known bound.
///
/// Grouping semantics are preserved upstream; a sensor compared in several
/// sub-conditions yields several constraints, in traversal order.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorConstraint {
    pub sensor: String,
    pub op: CompareOp,
    pub bound: Value,
    /// Duration of the sustained requirement, when the occurrence came from
    /// a threshold-over-time condition.
    pub duration_ms: Option<u64>,
    /// True when this occurrence sits (directly or transitively) under an
    /// `any` group, so violating it alone may not flip the rule.
    pub in_any_group: bool,
}

/// Everything the analyzer extracts from one rule.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleAnalysis {
    /// Sensors read by the condition tree.
    pub referenced_sensors: BTreeSet<String>,
    /// Sensors read by action value expressions and templates.
    pub action_sensors: BTreeSet<String>,
    /// `output:` keys written by either branch.
    pub produced_outputs: BTreeSet<String>,
    pub has_temporal: bool,
    /// Longest sustained duration per referenced sensor, for window sizing.
    pub max_duration_ms: u64,
    /// Comparison occurrences with literal bounds, in traversal order.
    pub constraints: Vec<SensorConstraint>,
    /// Sensors whose conditions could not be reduced to literal bounds.
    pub opaque_sensors: BTreeSet<String>,
}

/// Analyze a rule's condition tree and actions.
pub fn analyze(rule: &Rule) -> Result<RuleAnalysis, AnalyzerError> {
    let mut analysis = RuleAnalysis::default();

    collect(
        &rule.condition,
        false,
        &rule.name,
        &mut analysis,
    )?;

    for action in rule.all_actions() {
        if let Some(key) = action.produced_output() {
            analysis.produced_outputs.insert(key.to_string());
        }
        let expr = match action {
            crate::rules::model::Action::SetValue { value, .. } => value,
            crate::rules::model::Action::BufferAppend { value, .. } => value,
            crate::rules::model::Action::Log { template, .. } => template,
        };
        expr.referenced_sensors(&mut analysis.action_sensors);
    }

    Ok(analysis)
}

fn collect(
    condition: &Condition,
    in_any: bool,
    rule_name: &str,
    analysis: &mut RuleAnalysis,
) -> Result<(), AnalyzerError> {
    match condition {
        Condition::Comparison { sensor, op, rhs } => {
            analysis.referenced_sensors.insert(sensor.clone());
            rhs.referenced_sensors(&mut analysis.referenced_sensors);
            if let Expr::Literal(bound) = rhs {
                analysis.constraints.push(SensorConstraint {
                    sensor: sensor.clone(),
                    op: *op,
                    bound: bound.clone(),
                    duration_ms: None,
                    in_any_group: in_any,
                });
            } else {
                analysis.opaque_sensors.insert(sensor.clone());
            }
        }
        Condition::ThresholdOverTime {
            sensor,
            op,
            threshold,
            duration_ms,
        } => {
            analysis.referenced_sensors.insert(sensor.clone());
            analysis.has_temporal = true;
            analysis.max_duration_ms = analysis.max_duration_ms.max(*duration_ms);
            analysis.constraints.push(SensorConstraint {
                sensor: sensor.clone(),
                op: *op,
                bound: Value::Number(*threshold),
                duration_ms: Some(*duration_ms),
                in_any_group: in_any,
            });
        }
        Condition::Expression(expr) => {
            let mut sensors = BTreeSet::new();
            expr.referenced_sensors(&mut sensors);
            // A bare comparison expression still yields a usable constraint.
            if let Expr::Binary {
                op: crate::eval::expr::BinOp::Cmp(cmp),
                lhs,
                rhs,
            } = expr
            {
                if let (Expr::Sensor(sensor), Expr::Literal(bound)) = (lhs.as_ref(), rhs.as_ref()) {
                    analysis.constraints.push(SensorConstraint {
                        sensor: sensor.clone(),
                        op: *cmp,
                        bound: bound.clone(),
                        duration_ms: None,
                        in_any_group: in_any,
                    });
                    analysis.referenced_sensors.extend(sensors);
                    return Ok(());
                }
            }
            analysis.opaque_sensors.extend(sensors.iter().cloned());
            analysis.referenced_sensors.extend(sensors);
        }
        Condition::Group { all, any } => {
            if all.is_empty() && any.is_empty() {
                return Err(AnalyzerError::EmptyGroup(rule_name.to_string()));
            }
            for child in all {
                collect(child, in_any, rule_name, analysis)?;
            }
            for child in any {
                collect(child, true, rule_name, analysis)?;
            }
        }
    }
    Ok(())
}
