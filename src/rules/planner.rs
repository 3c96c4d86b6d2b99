//! Dependency planning
//!
//! Builds the rule-level dependency graph (edge A → B when B reads an
//! `output:` key that A produces), layers it with Kahn's algorithm, and
//! rejects configurations the engine cannot schedule: cycles and multiple
//! producers of the same output.
//!
//! Rules live in a flat array; edges, layers, and producer maps are all
//! index-based. Rules within one layer are pairwise independent and may be
//! evaluated concurrently.

use std::collections::{BTreeSet, HashMap};

use thiserror::Error;
use tracing::warn;

use crate::rules::analyzer::{self, RuleAnalysis};
use crate::rules::model::RuleSet;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Cyclic dependency between rules: {}", .path.join(" -> "))]
    CyclicDependency { path: Vec<String> },

    #[error("Output '{output}' is produced by both '{first}' and '{second}'")]
    ConflictingProducers {
        output: String,
        first: String,
        second: String,
    },

    #[error("{0}")]
    Malformed(#[from] analyzer::AnalyzerError),
}

// ============================================================================
// Execution Plan
// ============================================================================

/// The schedule the orchestrator executes every cycle.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// Rule indices grouped into dependency layers, in execution order.
    pub layers: Vec<Vec<usize>>,
    /// Per-rule analysis, parallel to `rule_set.rules`.
    pub analyses: Vec<RuleAnalysis>,
    /// Producing rule index per `output:` key.
    pub producers: HashMap<String, usize>,
    /// Every `input:` key any rule reads; the per-cycle snapshot set.
    pub input_keys: BTreeSet<String>,
    /// Longest sustained duration per sensor, for window sizing. Only
    /// sensors referenced by temporal conditions appear.
    pub window_durations_ms: HashMap<String, u64>,
}

impl ExecutionPlan {
    pub fn layer_of(&self, rule_idx: usize) -> Option<usize> {
        self.layers
            .iter()
            .position(|layer| layer.contains(&rule_idx))
    }
}

/// Analyze and layer a rule set.
///
/// `cycle_period_ms` is only used for the sub-period duration warning;
/// scheduling itself is period-independent.
pub fn plan(rule_set: &RuleSet, cycle_period_ms: u64) -> Result<ExecutionPlan, PlanError> {
    let rules = &rule_set.rules;

    let analyses = rules
        .iter()
        .map(analyzer::analyze)
        .collect::<Result<Vec<_>, _>>()?;

    // Producer map; duplicate producers are a configuration error. No
    // mutual-exclusion proof is attempted: two writers to one key is
    // rejected outright.
    let mut producers: HashMap<String, usize> = HashMap::new();
    for (idx, analysis) in analyses.iter().enumerate() {
        for output in &analysis.produced_outputs {
            if let Some(&first) = producers.get(output) {
                return Err(PlanError::ConflictingProducers {
                    output: output.clone(),
                    first: rules[first].name.clone(),
                    second: rules[idx].name.clone(),
                });
            }
            producers.insert(output.clone(), idx);
        }
    }

    // Edges: producer -> consumer, index-based adjacency.
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); rules.len()];
    let mut indegree: Vec<usize> = vec![0; rules.len()];
    for (consumer, analysis) in analyses.iter().enumerate() {
        let referenced: BTreeSet<&String> = analysis
            .referenced_sensors
            .iter()
            .chain(analysis.action_sensors.iter())
            .collect();
        for sensor in referenced {
            if let Some(&producer) = producers.get(sensor.as_str()) {
                if producer != consumer {
                    successors[producer].push(consumer);
                    indegree[consumer] += 1;
                }
            }
        }
    }

    // Kahn's algorithm, peeling whole source layers at a time.
    let mut layers: Vec<Vec<usize>> = Vec::new();
    let mut remaining: BTreeSet<usize> = (0..rules.len()).collect();
    let mut degree = indegree;
    while !remaining.is_empty() {
        let layer: Vec<usize> = remaining
            .iter()
            .copied()
            .filter(|&idx| degree[idx] == 0)
            .collect();
        if layer.is_empty() {
            let path = cycle_path(&remaining, &successors, rules);
            return Err(PlanError::CyclicDependency { path });
        }
        for &idx in &layer {
            remaining.remove(&idx);
            for &succ in &successors[idx] {
                degree[succ] = degree[succ].saturating_sub(1);
            }
        }
        layers.push(layer);
    }

    let mut input_keys = BTreeSet::new();
    let mut window_durations_ms: HashMap<String, u64> = HashMap::new();
    for (idx, analysis) in analyses.iter().enumerate() {
        for sensor in analysis
            .referenced_sensors
            .iter()
            .chain(analysis.action_sensors.iter())
        {
            if sensor.starts_with("input:") {
                input_keys.insert(sensor.clone());
            }
        }
        for constraint in &analysis.constraints {
            if let Some(duration) = constraint.duration_ms {
                if duration < cycle_period_ms {
                    warn!(
                        "Rule '{}': sustained duration {}ms is shorter than the cycle \
                         period {}ms; the condition holds as soon as one matching \
                         sample exists",
                        rules[idx].name, duration, cycle_period_ms
                    );
                }
                let entry = window_durations_ms
                    .entry(constraint.sensor.clone())
                    .or_insert(0);
                *entry = (*entry).max(duration);
            }
        }
    }

    Ok(ExecutionPlan {
        layers,
        analyses,
        producers,
        input_keys,
        window_durations_ms,
    })
}

/// Walk successor edges inside the stuck vertex set until a vertex repeats,
/// then return the rule names along the loop.
fn cycle_path(
    remaining: &BTreeSet<usize>,
    successors: &[Vec<usize>],
    rules: &[crate::rules::model::Rule],
) -> Vec<String> {
    let Some(&start) = remaining.iter().next() else {
        return Vec::new();
    };
    let mut path: Vec<usize> = vec![start];
    let mut current = start;
    loop {
        let Some(next) = successors[current]
            .iter()
            .copied()
            .find(|succ| remaining.contains(succ))
        else {
            break;
        };
        if let Some(pos) = path.iter().position(|&v| v == next) {
            let mut cycle: Vec<String> =
                path[pos..].iter().map(|&v| rules[v].name.clone()).collect();
            cycle.push(rules[next].name.clone());
            return cycle;
        }
        path.push(next);
        current = next;
    }
    path.into_iter().map(|v| rules[v].name.clone()).collect()
}
