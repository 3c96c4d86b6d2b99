//! Rule model, loading, analysis, and dependency planning.
//!
//! The pipeline at load time: YAML document → [`loader`] validation →
//! [`analyzer`] per-rule metadata → [`planner`] layered execution plan.
//! Everything downstream (engine, tester) consumes the immutable
//! [`model::RuleSet`] plus the [`planner::ExecutionPlan`].

pub mod analyzer;
pub mod loader;
pub mod model;
pub mod planner;

pub use analyzer::{analyze, walk, RuleAnalysis, SensorConstraint};
pub use loader::{load_path, load_str, LoadError};
pub use model::{
    Action, Condition, EmitPolicy, FallbackStrategy, InputSpec, Rule, RuleSet,
};
pub use planner::{plan, ExecutionPlan, PlanError};
