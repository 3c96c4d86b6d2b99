//! The cycle engine: orchestration of snapshot, layered evaluation, and
//! commit on a fixed period.

mod orchestrator;

pub use orchestrator::{Engine, EngineError, EngineStats};
