//! Rule document loading
//!
//! Parses version-3 YAML rule documents into a validated [`RuleSet`].
//! All configuration problems surface here, before the engine starts:
//! unknown operators, bad durations, wrong key namespaces, duplicate rule
//! names. Runtime never sees a half-valid rule.
//!
//! ## Document shape
//!
//! ```yaml
//! version: 3
//! rules:
//!   - name: high_temperature
//!     description: Flag overheating
//!     inputs:
//!       - id: input:temperature
//!         fallback: use_default
//!         default_value: 0
//!     conditions:
//!       all:
//!         - type: comparison
//!           sensor: input:temperature
//!           operator: greater_than
//!           value: 30
//!     actions:
//!       - type: set_value
//!         key: output:high_temperature
//!         value: true
//! ```

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::eval::expr::{CompareOp, Expr, ExprError};
use crate::rules::analyzer;
use crate::rules::model::{
    Action, Condition, EmitPolicy, FallbackStrategy, InputSpec, Rule, RuleSet,
};
use crate::types::{SensorKey, Value};

/// The only rule document version this engine understands.
pub const SUPPORTED_VERSION: u32 = 3;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to read rule document: {0}")]
    Io(#[from] std::io::Error),

    #[error("Rule document is not valid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Unsupported rule document version {0} (expected {SUPPORTED_VERSION})")]
    UnsupportedVersion(u32),

    #[error("Duplicate rule name '{0}'")]
    DuplicateRuleName(String),

    #[error("Rule '{rule}': {reason}")]
    MalformedRule { rule: String, reason: String },
}

impl LoadError {
    fn malformed(rule: &str, reason: impl std::fmt::Display) -> Self {
        LoadError::MalformedRule {
            rule: rule.to_string(),
            reason: reason.to_string(),
        }
    }
}

// ============================================================================
// Duration Literals
// ============================================================================

/// Parse a duration literal: an integer with an `ms`/`s`/`m`/`h`/`d` suffix.
/// A bare integer means milliseconds.
pub fn parse_duration_ms(raw: &str) -> Result<u64, String> {
    let trimmed = raw.trim();
    let (digits, multiplier) = if let Some(rest) = trimmed.strip_suffix("ms") {
        (rest, 1)
    } else if let Some(rest) = trimmed.strip_suffix('s') {
        (rest, 1_000)
    } else if let Some(rest) = trimmed.strip_suffix('m') {
        (rest, 60_000)
    } else if let Some(rest) = trimmed.strip_suffix('h') {
        (rest, 3_600_000)
    } else if let Some(rest) = trimmed.strip_suffix('d') {
        (rest, 86_400_000)
    } else {
        (trimmed, 1)
    };
    digits
        .trim()
        .parse::<u64>()
        .map(|n| n * multiplier)
        .map_err(|_| format!("invalid duration literal '{raw}'"))
}

/// A duration field in YAML: either a bare integer (milliseconds) or a
/// suffixed literal like `1500ms` / `5s`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Millis(u64),
    Literal(String),
}

impl RawDuration {
    fn to_ms(&self) -> Result<u64, String> {
        match self {
            RawDuration::Millis(ms) => Ok(*ms),
            RawDuration::Literal(text) => parse_duration_ms(text),
        }
    }
}

// ============================================================================
// Raw Document Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawDocument {
    version: u32,
    #[serde(default)]
    rules: Vec<RawRule>,
}

#[derive(Debug, Deserialize)]
struct RawRule {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    inputs: Vec<RawInput>,
    conditions: RawGroup,
    #[serde(default)]
    actions: Vec<RawAction>,
    #[serde(default)]
    else_actions: Vec<RawAction>,
}

#[derive(Debug, Deserialize)]
struct RawInput {
    id: String,
    #[serde(default)]
    fallback: Option<FallbackStrategy>,
    #[serde(default)]
    default_value: Option<Value>,
    #[serde(default)]
    max_age: Option<RawDuration>,
}

/// Group node: at least one of `all` / `any` must be present.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawGroup {
    #[serde(default)]
    all: Option<Vec<RawCondition>>,
    #[serde(default)]
    any: Option<Vec<RawCondition>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawCondition {
    Group(RawGroup),
    Leaf(RawLeaf),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RawLeaf {
    Comparison {
        sensor: String,
        operator: String,
        #[serde(default)]
        value: Option<Value>,
        #[serde(default)]
        value_expression: Option<String>,
    },
    ThresholdOverTime {
        sensor: String,
        operator: String,
        threshold: f64,
        duration: RawDuration,
    },
    Expression {
        expression: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RawAction {
    SetValue {
        key: String,
        #[serde(default)]
        value: Option<Value>,
        #[serde(default)]
        value_expression: Option<String>,
    },
    BufferAppend {
        key: String,
        value_expression: String,
        max_items: usize,
        #[serde(default)]
        emit: Option<EmitPolicy>,
    },
    Log {
        template: String,
        #[serde(default)]
        emit: Option<EmitPolicy>,
    },
}

// ============================================================================
// Loading
// ============================================================================

/// Load a rule document from a file.
pub fn load_path(path: impl AsRef<Path>) -> Result<RuleSet, LoadError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let source_file = path.display().to_string();
    load_str(&content, &source_file)
}

/// Load a rule document from YAML text.
pub fn load_str(content: &str, source_file: &str) -> Result<RuleSet, LoadError> {
    let doc: RawDocument = serde_yaml::from_str(content)?;
    if doc.version != SUPPORTED_VERSION {
        return Err(LoadError::UnsupportedVersion(doc.version));
    }

    let mut rules = Vec::with_capacity(doc.rules.len());
    for raw in doc.rules {
        if rules.iter().any(|r: &Rule| r.name == raw.name) {
            return Err(LoadError::DuplicateRuleName(raw.name));
        }
        let line = locate_rule_line(content, &raw.name);
        rules.push(convert_rule(raw, source_file, line)?);
    }

    info!(
        "Loaded {} rule(s) from {} (version {})",
        rules.len(),
        source_file,
        SUPPORTED_VERSION
    );

    Ok(RuleSet {
        rules,
        source_file: source_file.to_string(),
    })
}

/// Best-effort source line for diagnostics: first line declaring the rule name.
fn locate_rule_line(content: &str, name: &str) -> usize {
    for (idx, line) in content.lines().enumerate() {
        let trimmed = line.trim_start().trim_start_matches("- ");
        if let Some(rest) = trimmed.strip_prefix("name:") {
            if rest.trim().trim_matches(['"', '\'']) == name {
                return idx + 1;
            }
        }
    }
    0
}

fn convert_rule(raw: RawRule, source_file: &str, source_line: usize) -> Result<Rule, LoadError> {
    let name = raw.name;

    let condition = convert_group(raw.conditions, &name)?;
    let actions = convert_actions(raw.actions, &name)?;
    let else_actions = convert_actions(raw.else_actions, &name)?;

    let mut inputs = Vec::with_capacity(raw.inputs.len());
    for raw_input in raw.inputs {
        inputs.push(convert_input(raw_input, &name)?);
    }

    let mut rule = Rule {
        name: name.clone(),
        description: raw.description,
        inputs,
        condition,
        actions,
        else_actions,
        source_file: source_file.to_string(),
        source_line,
    };

    // Invariant: inputs[] is a superset of sensors referenced in conditions.
    // Referenced-but-undeclared sensors get an implicit propagate spec;
    // sensors read only by action expressions are declared the same way so
    // the resolved context can see them.
    let analysis =
        analyzer::analyze(&rule).map_err(|e| LoadError::malformed(&name, e))?;
    for sensor in analysis
        .referenced_sensors
        .iter()
        .chain(analysis.action_sensors.iter())
    {
        if rule.input_spec(sensor).is_none() {
            rule.inputs.push(InputSpec::implicit(sensor));
        }
    }

    // Rules write outputs, never inputs. Declared inputs must be readable keys.
    for spec in &rule.inputs {
        SensorKey::parse(&spec.id).map_err(|e| LoadError::malformed(&name, e))?;
    }

    Ok(rule)
}

fn convert_input(raw: RawInput, rule: &str) -> Result<InputSpec, LoadError> {
    let fallback = raw.fallback.unwrap_or(FallbackStrategy::PropagateUnavailable);
    if fallback == FallbackStrategy::UseDefault && raw.default_value.is_none() {
        return Err(LoadError::malformed(
            rule,
            format!("input '{}' uses use_default but declares no default_value", raw.id),
        ));
    }
    let max_age_ms = match raw.max_age {
        Some(d) => Some(d.to_ms().map_err(|e| LoadError::malformed(rule, e))?),
        None => None,
    };
    if fallback == FallbackStrategy::UseLastKnown && max_age_ms.is_none() {
        return Err(LoadError::malformed(
            rule,
            format!("input '{}' uses use_last_known but declares no max_age", raw.id),
        ));
    }
    Ok(InputSpec {
        id: raw.id,
        fallback,
        default_value: raw.default_value,
        max_age_ms,
        implicit: false,
    })
}

fn convert_group(raw: RawGroup, rule: &str) -> Result<Condition, LoadError> {
    if raw.all.is_none() && raw.any.is_none() {
        return Err(LoadError::malformed(
            rule,
            "group condition has neither 'all' nor 'any'",
        ));
    }
    let all = raw
        .all
        .unwrap_or_default()
        .into_iter()
        .map(|c| convert_condition(c, rule))
        .collect::<Result<Vec<_>, _>>()?;
    let any = raw
        .any
        .unwrap_or_default()
        .into_iter()
        .map(|c| convert_condition(c, rule))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Condition::Group { all, any })
}

fn convert_condition(raw: RawCondition, rule: &str) -> Result<Condition, LoadError> {
    match raw {
        RawCondition::Group(group) => convert_group(group, rule),
        RawCondition::Leaf(RawLeaf::Comparison {
            sensor,
            operator,
            value,
            value_expression,
        }) => {
            let op = CompareOp::parse(&operator).map_err(|e| LoadError::malformed(rule, e))?;
            let rhs = convert_value_or_expression(value, value_expression, rule, &sensor)?;
            Ok(Condition::Comparison { sensor, op, rhs })
        }
        RawCondition::Leaf(RawLeaf::ThresholdOverTime {
            sensor,
            operator,
            threshold,
            duration,
        }) => {
            let op = CompareOp::parse(&operator).map_err(|e| LoadError::malformed(rule, e))?;
            let duration_ms = duration.to_ms().map_err(|e| LoadError::malformed(rule, e))?;
            Ok(Condition::ThresholdOverTime {
                sensor,
                op,
                threshold,
                duration_ms,
            })
        }
        RawCondition::Leaf(RawLeaf::Expression { expression }) => {
            let expr = parse_expr(&expression, rule)?;
            Ok(Condition::Expression(expr))
        }
    }
}

fn convert_actions(raw: Vec<RawAction>, rule: &str) -> Result<Vec<Action>, LoadError> {
    raw.into_iter().map(|a| convert_action(a, rule)).collect()
}

fn convert_action(raw: RawAction, rule: &str) -> Result<Action, LoadError> {
    match raw {
        RawAction::SetValue {
            key,
            value,
            value_expression,
        } => {
            let key = parse_action_key(&key, rule)?;
            if !key.is_output() {
                return Err(LoadError::malformed(
                    rule,
                    format!("set_value key '{key}' must be in the output: namespace"),
                ));
            }
            let value = convert_value_or_expression(value, value_expression, rule, key.name())?;
            Ok(Action::SetValue { key, value })
        }
        RawAction::BufferAppend {
            key,
            value_expression,
            max_items,
            emit,
        } => {
            let key = parse_action_key(&key, rule)?;
            if !key.is_buffer() {
                return Err(LoadError::malformed(
                    rule,
                    format!("buffer_append key '{key}' must be in the buffer: namespace"),
                ));
            }
            if max_items == 0 {
                return Err(LoadError::malformed(
                    rule,
                    format!("buffer_append key '{key}' requires max_items >= 1"),
                ));
            }
            Ok(Action::BufferAppend {
                key,
                value: parse_expr(&value_expression, rule)?,
                max_items,
                emit: emit.unwrap_or(EmitPolicy::Always),
            })
        }
        RawAction::Log { template, emit } => Ok(Action::Log {
            template: Expr::parse_template(&template)
                .map_err(|e| LoadError::malformed(rule, e))?,
            emit: emit.unwrap_or(EmitPolicy::Always),
        }),
    }
}

fn parse_action_key(raw: &str, rule: &str) -> Result<SensorKey, LoadError> {
    SensorKey::parse(raw).map_err(|e| LoadError::malformed(rule, e))
}

fn parse_expr(raw: &str, rule: &str) -> Result<Expr, LoadError> {
    Expr::parse(raw).map_err(|e: ExprError| LoadError::malformed(rule, e))
}

fn convert_value_or_expression(
    value: Option<Value>,
    value_expression: Option<String>,
    rule: &str,
    field: &str,
) -> Result<Expr, LoadError> {
    match (value, value_expression) {
        (Some(v), None) => Ok(Expr::Literal(v)),
        (None, Some(raw)) => parse_expr(&raw, rule),
        (Some(_), Some(_)) => Err(LoadError::malformed(
            rule,
            format!("'{field}' declares both value and value_expression"),
        )),
        (None, None) => Err(LoadError::malformed(
            rule,
            format!("'{field}' declares neither value nor value_expression"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASIC_DOC: &str = r#"
version: 3
rules:
  - name: high_temperature
    description: Flag overheating
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
"#;

    #[test]
    fn loads_a_basic_document() {
        let set = load_str(BASIC_DOC, "test.yaml").unwrap();
        assert_eq!(set.len(), 1);
        let rule = &set.rules[0];
        assert_eq!(rule.name, "high_temperature");
        assert_eq!(rule.source_line, 4);
        // Referenced sensor was auto-declared as an implicit input.
        assert!(rule.input_spec("input:temperature").is_some());
    }

    #[test]
    fn rejects_wrong_version() {
        let doc = "version: 2\nrules: []\n";
        assert!(matches!(
            load_str(doc, "test.yaml"),
            Err(LoadError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn rejects_duplicate_rule_names() {
        let doc = r#"
version: 3
rules:
  - name: dup
    conditions:
      all:
        - type: comparison
          sensor: input:a
          operator: ">"
          value: 1
  - name: dup
    conditions:
      all:
        - type: comparison
          sensor: input:a
          operator: "<"
          value: 1
"#;
        assert!(matches!(
            load_str(doc, "test.yaml"),
            Err(LoadError::DuplicateRuleName(name)) if name == "dup"
        ));
    }

    #[test]
    fn rejects_unknown_operator() {
        let doc = r#"
version: 3
rules:
  - name: bad_op
    conditions:
      all:
        - type: comparison
          sensor: input:a
          operator: "~="
          value: 1
"#;
        let err = load_str(doc, "test.yaml").unwrap_err();
        assert!(err.to_string().contains("bad_op"));
    }

    #[test]
    fn accepts_named_operators_and_duration_suffixes() {
        let doc = r#"
version: 3
rules:
  - name: sustained_hot
    conditions:
      all:
        - type: threshold_over_time
          sensor: input:temperature
          operator: greater_than
          threshold: 100
          duration: 1s
    actions:
      - type: set_value
        key: output:sustained_hot
        value: true
"#;
        let set = load_str(doc, "test.yaml").unwrap();
        match &set.rules[0].condition {
            Condition::Group { all, .. } => match &all[0] {
                Condition::ThresholdOverTime { duration_ms, .. } => {
                    assert_eq!(*duration_ms, 1000);
                }
                other => panic!("unexpected condition {other:?}"),
            },
            other => panic!("unexpected condition {other:?}"),
        }
    }

    #[test]
    fn rejects_set_value_outside_output_namespace() {
        let doc = r#"
version: 3
rules:
  - name: writes_input
    conditions:
      all:
        - type: comparison
          sensor: input:a
          operator: ">"
          value: 1
    actions:
      - type: set_value
        key: input:a
        value: 1
"#;
        let err = load_str(doc, "test.yaml").unwrap_err();
        assert!(err.to_string().contains("output:"));
    }

    #[test]
    fn rejects_use_default_without_default_value() {
        let doc = r#"
version: 3
rules:
  - name: missing_default
    inputs:
      - id: input:flow
        fallback: use_default
    conditions:
      all:
        - type: comparison
          sensor: input:flow
          operator: ">"
          value: 5
"#;
        assert!(load_str(doc, "test.yaml").is_err());
    }

    #[test]
    fn rejects_empty_group() {
        let doc = r#"
version: 3
rules:
  - name: empty_group
    conditions: {}
"#;
        let err = load_str(doc, "test.yaml").unwrap_err();
        assert!(err.to_string().contains("neither"));
    }

    #[test]
    fn nested_groups_parse() {
        let doc = r#"
version: 3
rules:
  - name: nested
    conditions:
      all:
        - any:
            - type: comparison
              sensor: input:a
              operator: ">"
              value: 1
            - type: comparison
              sensor: input:b
              operator: "<"
              value: 2
        - type: expression
          expression: "input:c == true"
"#;
        let set = load_str(doc, "test.yaml").unwrap();
        let analysis = analyzer::analyze(&set.rules[0]).unwrap();
        assert_eq!(analysis.referenced_sensors.len(), 3);
    }

    #[test]
    fn duration_literals() {
        assert_eq!(parse_duration_ms("250ms").unwrap(), 250);
        assert_eq!(parse_duration_ms("5s").unwrap(), 5_000);
        assert_eq!(parse_duration_ms("2m").unwrap(), 120_000);
        assert_eq!(parse_duration_ms("1h").unwrap(), 3_600_000);
        assert_eq!(parse_duration_ms("1d").unwrap(), 86_400_000);
        assert_eq!(parse_duration_ms("750").unwrap(), 750);
        assert!(parse_duration_ms("fast").is_err());
    }
}
