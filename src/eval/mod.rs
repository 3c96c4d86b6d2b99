//! Evaluation layer: expressions, temporal windows, fallbacks, and the
//! per-rule evaluator that combines them each cycle.
//!
//! Everything here is synchronous and pure with respect to the store: the
//! orchestrator hands in snapshots and folds the returned writes back out.

pub mod expr;
pub mod fallback;
pub mod rule_eval;
pub mod window;

pub use expr::{CompareOp, Expr, ExprError, ValueSource};
pub use fallback::{resolve, ResolvedContext};
pub use rule_eval::{evaluate, BufferWrite, RuleOutcome, RuleRuntime};
pub use window::{SensorId, WindowStore};
