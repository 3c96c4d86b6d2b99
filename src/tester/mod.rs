//! The tester: scenario synthesis, execution, and reporting.
//!
//! Scenarios are derived from the rule definitions themselves
//! ([`synthesizer`]), executed black-box against a running engine through
//! the shared store ([`runner`]), and rendered from the result document
//! ([`report`]).

pub mod report;
pub mod runner;
pub mod scenario;
pub mod synthesizer;

pub use report::{render, ReportFormat};
pub use runner::ScenarioRunner;
pub use scenario::{ResultDocument, Scenario, ScenarioDocument};
pub use synthesizer::{synthesize, SynthesisOutput};
