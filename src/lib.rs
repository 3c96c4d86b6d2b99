//! VIGIL: Rule-Based Stream Processing
//!
//! Compiles declarative rules over named sensor streams into a fixed-period
//! runtime, and synthesizes black-box test scenarios from the same rules.
//!
//! ## Architecture
//!
//! - **Rules**: YAML rule documents → validated model → layered execution
//!   plan (dependency DAG via Kahn's algorithm)
//! - **Evaluation**: three-valued (Kleene) conditions, per-input fallback
//!   strategies, ring-buffered temporal windows with a sustained-predicate
//!   operator
//! - **Engine**: a cycle orchestrator that snapshots inputs, evaluates
//!   layers concurrently, and commits outputs to the key/value store
//! - **Tester**: scenario synthesis from rule ASTs, a runner driving the
//!   engine through the store, and report rendering

pub mod config;
pub mod engine;
pub mod eval;
pub mod rules;
pub mod store;
pub mod tester;
pub mod types;

// Re-export the types most callers need
pub use config::{Config, EngineConfig, TesterConfig};
pub use engine::{Engine, EngineError, EngineStats};
pub use rules::{load_path, load_str, LoadError, Rule, RuleSet};
pub use store::{MemoryStore, SensorStore, SledStore, StoreError};
pub use tester::{ScenarioDocument, ScenarioRunner};
pub use types::{Kleene, SensorKey, Value};
