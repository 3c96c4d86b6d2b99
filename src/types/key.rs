//! Namespaced sensor keys
//!
//! Every key in the store carries a role prefix: `input:` for external
//! measurements, `output:` for rule-produced values, `buffer:` for rolling
//! histories. The prefix decides write permissions: rules may only write
//! `output:` and `buffer:` keys.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("Sensor key '{0}' is missing a namespace prefix (expected input:, output:, or buffer:)")]
    MissingNamespace(String),

    #[error("Sensor key '{0}' has unknown namespace '{1}'")]
    UnknownNamespace(String, String),

    #[error("Sensor key '{0}' has an empty name")]
    EmptyName(String),
}

// ============================================================================
// Sensor Keys
// ============================================================================

/// Role of a sensor key within the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    /// External measurement, read-only for rules.
    Input,
    /// Rule-produced value.
    Output,
    /// Rolling history maintained by buffer-append actions.
    Buffer,
}

impl Namespace {
    pub fn prefix(self) -> &'static str {
        match self {
            Namespace::Input => "input",
            Namespace::Output => "output",
            Namespace::Buffer => "buffer",
        }
    }

    /// Whether rules are permitted to write keys in this namespace.
    pub fn writable_by_rules(self) -> bool {
        matches!(self, Namespace::Output | Namespace::Buffer)
    }
}

/// A parsed, validated sensor key such as `input:temperature`.
///
/// Keys are case-sensitive. The canonical string form is
/// `<namespace>:<name>` and round-trips through [`std::fmt::Display`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SensorKey {
    namespace: Namespace,
    name: String,
}

impl SensorKey {
    pub fn new(namespace: Namespace, name: impl Into<String>) -> Self {
        Self {
            namespace,
            name: name.into(),
        }
    }

    pub fn input(name: impl Into<String>) -> Self {
        Self::new(Namespace::Input, name)
    }

    pub fn output(name: impl Into<String>) -> Self {
        Self::new(Namespace::Output, name)
    }

    pub fn buffer(name: impl Into<String>) -> Self {
        Self::new(Namespace::Buffer, name)
    }

    /// Parse a `namespace:name` string into a key.
    pub fn parse(raw: &str) -> Result<Self, KeyError> {
        let (prefix, name) = raw
            .split_once(':')
            .ok_or_else(|| KeyError::MissingNamespace(raw.to_string()))?;

        let namespace = match prefix {
            "input" => Namespace::Input,
            "output" => Namespace::Output,
            "buffer" => Namespace::Buffer,
            other => {
                return Err(KeyError::UnknownNamespace(
                    raw.to_string(),
                    other.to_string(),
                ))
            }
        };

        if name.is_empty() {
            return Err(KeyError::EmptyName(raw.to_string()));
        }

        Ok(Self {
            namespace,
            name: name.to_string(),
        })
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    /// Name without the namespace prefix.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_input(&self) -> bool {
        self.namespace == Namespace::Input
    }

    pub fn is_output(&self) -> bool {
        self.namespace == Namespace::Output
    }

    pub fn is_buffer(&self) -> bool {
        self.namespace == Namespace::Buffer
    }
}

impl std::fmt::Display for SensorKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.namespace.prefix(), self.name)
    }
}

impl std::str::FromStr for SensorKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for SensorKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SensorKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
