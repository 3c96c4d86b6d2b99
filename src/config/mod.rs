//! Engine & Tester Configuration
//!
//! Configuration is loaded once at startup from three layers, later layers
//! winning:
//!
//! 1. Built-in defaults ([`defaults`])
//! 2. A TOML file: `VIGIL_CONFIG` environment variable, or `vigil.toml`
//!    in the working directory if present
//! 3. `VIGIL_*` environment variables
//!
//! ```ignore
//! let config = Config::load()?;
//! let period = config.engine.cycle_period_ms;
//! ```

pub mod defaults;

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use defaults::{
    DEFAULT_BUFFER_CAPACITY, DEFAULT_CYCLE_PERIOD_MS, DEFAULT_GLOBAL_TIMEOUT_MULTIPLIER,
    DEFAULT_STEP_DELAY_MULTIPLIER, DEFAULT_TIMEOUT_MULTIPLIER, MIN_STORE_OP_TIMEOUT_MS,
};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Io(PathBuf, std::io::Error),

    #[error("Config file {0} is not valid TOML: {1}")]
    Toml(PathBuf, toml::de::Error),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

// ============================================================================
// Engine Configuration
// ============================================================================

/// Cycle-loop settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Base period of the evaluation loop, in milliseconds.
    pub cycle_period_ms: u64,
    /// Upper bound for per-sensor window samples.
    pub buffer_capacity: usize,
    /// Per-operation store timeout in milliseconds. 0 means one cycle period.
    pub store_op_timeout_ms: u64,
    /// Path for the sled-backed store (`serve` subcommand).
    pub store_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cycle_period_ms: DEFAULT_CYCLE_PERIOD_MS,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            store_op_timeout_ms: 0,
            store_path: None,
        }
    }
}

impl EngineConfig {
    /// Effective per-operation store timeout.
    pub fn store_timeout(&self) -> std::time::Duration {
        let ms = if self.store_op_timeout_ms == 0 {
            self.cycle_period_ms
        } else {
            self.store_op_timeout_ms
        };
        std::time::Duration::from_millis(ms.max(MIN_STORE_OP_TIMEOUT_MS))
    }

    pub fn cycle_period(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.cycle_period_ms)
    }
}

// ============================================================================
// Tester Configuration
// ============================================================================

/// Scenario runner scaling knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TesterConfig {
    /// Scales every step delay.
    pub step_delay_multiplier: f64,
    /// Scales every expectation timeout.
    pub timeout_multiplier: f64,
    /// Additional scalar applied on top of both multipliers.
    pub global_timeout_multiplier: f64,
}

impl Default for TesterConfig {
    fn default() -> Self {
        Self {
            step_delay_multiplier: DEFAULT_STEP_DELAY_MULTIPLIER,
            timeout_multiplier: DEFAULT_TIMEOUT_MULTIPLIER,
            global_timeout_multiplier: DEFAULT_GLOBAL_TIMEOUT_MULTIPLIER,
        }
    }
}

impl TesterConfig {
    /// Effective delay scale: step multiplier times the global scalar.
    pub fn delay_scale(&self) -> f64 {
        self.step_delay_multiplier * self.global_timeout_multiplier
    }

    /// Effective timeout scale: timeout multiplier times the global scalar.
    pub fn timeout_scale(&self) -> f64 {
        self.timeout_multiplier * self.global_timeout_multiplier
    }
}

// ============================================================================
// Combined Configuration
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub tester: TesterConfig,
}

impl Config {
    /// Load configuration: defaults, then TOML file, then environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match config_file_path() {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Toml(path.to_path_buf(), e))?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Apply `VIGIL_*` environment overrides.
    fn apply_env(&mut self) {
        read_env("VIGIL_CYCLE_PERIOD_MS", &mut self.engine.cycle_period_ms);
        read_env("VIGIL_BUFFER_CAPACITY", &mut self.engine.buffer_capacity);
        read_env("VIGIL_STORE_OP_TIMEOUT_MS", &mut self.engine.store_op_timeout_ms);
        if let Ok(path) = std::env::var("VIGIL_STORE_PATH") {
            self.engine.store_path = Some(PathBuf::from(path));
        }
        read_env(
            "VIGIL_STEP_DELAY_MULTIPLIER",
            &mut self.tester.step_delay_multiplier,
        );
        read_env(
            "VIGIL_TIMEOUT_MULTIPLIER",
            &mut self.tester.timeout_multiplier,
        );
        read_env(
            "VIGIL_GLOBAL_TIMEOUT_MULTIPLIER",
            &mut self.tester.global_timeout_multiplier,
        );
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.cycle_period_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "engine.cycle_period_ms",
                "must be greater than zero".to_string(),
            ));
        }
        let multipliers = [
            (
                "tester.step_delay_multiplier",
                self.tester.step_delay_multiplier,
            ),
            ("tester.timeout_multiplier", self.tester.timeout_multiplier),
            (
                "tester.global_timeout_multiplier",
                self.tester.global_timeout_multiplier,
            ),
        ];
        for (name, value) in multipliers {
            if value <= 0.0 || !value.is_finite() {
                return Err(ConfigError::InvalidValue(
                    name,
                    format!("must be a positive finite number, got {value}"),
                ));
            }
        }
        Ok(())
    }
}

fn config_file_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("VIGIL_CONFIG") {
        return Some(PathBuf::from(path));
    }
    let default = PathBuf::from("vigil.toml");
    default.exists().then_some(default)
}

fn read_env<T: std::str::FromStr>(name: &str, target: &mut T) {
    if let Ok(raw) = std::env::var(name) {
        match raw.parse() {
            Ok(value) => *target = value,
            Err(_) => warn!("Ignoring unparseable {}={}", name, raw),
        }
    }
}
