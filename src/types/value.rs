//! Sensor values and three-valued logic
//!
//! `Value` is the scalar type flowing through the whole engine: store reads,
//! snapshots, window samples, action emissions. Absence is a first-class
//! variant, not an `Option` wrapper, so fallback resolution and Kleene
//! evaluation can treat "no reading" as ordinary data.

use serde::{Deserialize, Serialize};

// ============================================================================
// Value
// ============================================================================

/// A sensor value: number, boolean, string, or absent.
///
/// Serializes untagged so store entries and scenario documents read as plain
/// JSON scalars (`42.0`, `true`, `"HOT"`, `null`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Number(f64),
    Text(String),
    /// No reading available. Maps to JSON `null`.
    Absent,
}

impl Value {
    /// Numeric view, if this value is a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Boolean view, if this value is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Absent)
    }

    pub fn is_present(&self) -> bool {
        !self.is_absent()
    }

    /// Render for string templates and log output.
    ///
    /// Absent renders as the literal token `null` (matching the template
    /// contract), numbers drop a trailing `.0` so `5.0` prints as `5`.
    pub fn render(&self) -> String {
        match self {
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            Value::Text(s) => s.clone(),
            Value::Absent => "null".to_string(),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.render())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

// ============================================================================
// Kleene Logic
// ============================================================================

/// A three-valued truth value: {True, False, Indeterminate}.
///
/// Indeterminate arises when a condition touches an Absent operand. It is a
/// distinct scalar rather than `Option<bool>` so that the connectives below
/// are the only way to combine truth values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Kleene {
    True,
    False,
    Indeterminate,
}

impl Kleene {
    /// Kleene conjunction. False dominates; Indeterminate absorbs True.
    pub fn and(self, other: Kleene) -> Kleene {
        match (self, other) {
            (Kleene::False, _) | (_, Kleene::False) => Kleene::False,
            (Kleene::True, Kleene::True) => Kleene::True,
            _ => Kleene::Indeterminate,
        }
    }

    /// Kleene disjunction. True dominates; Indeterminate absorbs False.
    pub fn or(self, other: Kleene) -> Kleene {
        match (self, other) {
            (Kleene::True, _) | (_, Kleene::True) => Kleene::True,
            (Kleene::False, Kleene::False) => Kleene::False,
            _ => Kleene::Indeterminate,
        }
    }

    /// Kleene negation. Indeterminate stays Indeterminate.
    pub fn not(self) -> Kleene {
        match self {
            Kleene::True => Kleene::False,
            Kleene::False => Kleene::True,
            Kleene::Indeterminate => Kleene::Indeterminate,
        }
    }

    /// Collapse to a plain boolean at the action-dispatch boundary.
    ///
    /// This is the only sanctioned coercion out of three-valued logic;
    /// everything upstream of action dispatch stays in `Kleene`.
    pub fn to_bool_or(self, default: bool) -> bool {
        match self {
            Kleene::True => true,
            Kleene::False => false,
            Kleene::Indeterminate => default,
        }
    }
}

impl From<bool> for Kleene {
    fn from(b: bool) -> Self {
        if b {
            Kleene::True
        } else {
            Kleene::False
        }
    }
}

impl std::fmt::Display for Kleene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Kleene::True => write!(f, "true"),
            Kleene::False => write!(f, "false"),
            Kleene::Indeterminate => write!(f, "indeterminate"),
        }
    }
}
