//! Tester round trip: synthesize → run → report
//!
//! Loads a rule document, derives scenarios from it, executes them against
//! a live in-process engine over the shared in-memory store, and checks
//! that the synthesized expectations actually hold. This is the whole
//! tester path exercised end to end.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use vigil::config::{EngineConfig, TesterConfig};
use vigil::engine::Engine;
use vigil::rules::{load_str, plan};
use vigil::store::{MemoryStore, SensorStore};
use vigil::tester::{render, synthesize, ReportFormat, ScenarioRunner};

const CYCLE_MS: u64 = 50;

const RULES: &str = r#"
version: 3
rules:
  - name: high_temperature
    description: Flag overheating
    inputs:
      - id: input:temperature
        fallback: propagate_unavailable
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
    else_actions:
      - type: set_value
        key: output:high_temperature
        value: false
  - name: heat_alert
    conditions:
      all:
        - type: comparison
          sensor: output:high_temperature
          operator: "=="
          value: true
    actions:
      - type: set_value
        key: output:alert
        value: "HOT"
  - name: fahrenheit
    conditions:
      all:
        - type: comparison
          sensor: input:temperature
          operator: ">"
          value: -273
    actions:
      - type: set_value
        key: output:temperature_f
        value_expression: "input:temperature * 1.8 + 32"
"#;

#[tokio::test(start_paused = true)]
async fn synthesized_scenarios_pass_against_the_live_engine() {
    let rule_set = load_str(RULES, "roundtrip.yaml").unwrap();
    let execution_plan = plan(&rule_set, CYCLE_MS).unwrap();
    let synthesis = synthesize(&rule_set, &execution_plan, CYCLE_MS);
    assert!(
        synthesis.warnings.is_empty(),
        "unexpected warnings: {:?}",
        synthesis.warnings
    );

    // Families present for this rule set: positives and negatives for all
    // three rules, a dependency scenario for heat_alert, a fallback
    // scenario for the declared temperature input.
    let names: Vec<&str> = synthesis
        .document
        .scenarios
        .iter()
        .map(|s| s.name.as_str())
        .collect();
    assert!(names.contains(&"high_temperature_basic_positive"));
    assert!(names.contains(&"high_temperature_basic_negative"));
    assert!(names.contains(&"heat_alert_dependency"));
    assert!(names.contains(&"high_temperature_fallback_propagate_temperature"));

    let store: Arc<dyn SensorStore> = Arc::new(MemoryStore::new());
    let config = EngineConfig {
        cycle_period_ms: CYCLE_MS,
        ..EngineConfig::default()
    };
    let engine = Engine::new(rule_set, config, Arc::clone(&store)).unwrap();
    let cancel = CancellationToken::new();
    let engine_handle = tokio::spawn(engine.run(cancel.clone()));

    let runner = ScenarioRunner::new(Arc::clone(&store), TesterConfig::default());
    let results = runner.run_document(&synthesis.document).await;

    cancel.cancel();
    let stats = engine_handle.await.unwrap();
    assert!(stats.cycles_run > 0);

    for result in &results.results {
        assert!(
            result.success,
            "scenario '{}' failed: {:?}",
            result.name, result.error_message
        );
    }

    // The report renders all three formats from the same results.
    let text = render(&results, ReportFormat::Text);
    assert!(text.contains("0 failed"));
    let markdown = render(&results, ReportFormat::Markdown);
    assert!(markdown.contains("high_temperature_basic_positive"));
    let html = render(&results, ReportFormat::Html);
    assert!(html.contains("<table>"));
}

#[tokio::test(start_paused = true)]
async fn temporal_scenario_passes_against_the_live_engine() {
    let rules = r#"
version: 3
rules:
  - name: sustained_hot
    conditions:
      all:
        - type: threshold_over_time
          sensor: input:temperature
          operator: ">"
          threshold: 100
          duration: 500ms
    actions:
      - type: set_value
        key: output:sustained_hot
        value: true
    else_actions:
      - type: set_value
        key: output:sustained_hot
        value: false
"#;
    let rule_set = load_str(rules, "temporal.yaml").unwrap();
    let execution_plan = plan(&rule_set, CYCLE_MS).unwrap();
    let synthesis = synthesize(&rule_set, &execution_plan, CYCLE_MS);

    let temporal = synthesis
        .document
        .scenarios
        .iter()
        .find(|s| s.name == "sustained_hot_temporal")
        .expect("temporal scenario exists");
    assert_eq!(temporal.steps.len(), 5);

    let store: Arc<dyn SensorStore> = Arc::new(MemoryStore::new());
    let config = EngineConfig {
        cycle_period_ms: CYCLE_MS,
        ..EngineConfig::default()
    };
    let engine = Engine::new(rule_set, config, Arc::clone(&store)).unwrap();
    let cancel = CancellationToken::new();
    let engine_handle = tokio::spawn(engine.run(cancel.clone()));

    let runner = ScenarioRunner::new(Arc::clone(&store), TesterConfig::default());
    let result = runner.run_scenario(temporal).await;

    cancel.cancel();
    engine_handle.await.unwrap();

    assert!(
        result.success,
        "temporal scenario failed: {:?}, steps: {:?}",
        result.error_message,
        result
            .step_results
            .iter()
            .map(|s| (s.name.clone(), s.success))
            .collect::<Vec<_>>()
    );
}

#[tokio::test(start_paused = true)]
async fn failing_expectation_is_reported_not_swallowed() {
    // A scenario expecting an output no rule produces must fail cleanly.
    let rule_set = load_str(RULES, "roundtrip.yaml").unwrap();
    let store: Arc<dyn SensorStore> = Arc::new(MemoryStore::new());
    let config = EngineConfig {
        cycle_period_ms: CYCLE_MS,
        ..EngineConfig::default()
    };
    let engine = Engine::new(rule_set, config, Arc::clone(&store)).unwrap();
    let cancel = CancellationToken::new();
    let engine_handle = tokio::spawn(engine.run(cancel.clone()));

    let doc: vigil::tester::ScenarioDocument = serde_json::from_str(
        r#"{
        "scenarios": [{
            "name": "expects_ghost_output",
            "clearOutputs": true,
            "steps": [{
                "name": "write_and_wait",
                "inputs": [{"key": "input:temperature", "value": 35.0}],
                "delay": 150,
                "expectations": [{
                    "key": "output:does_not_exist",
                    "expected": true,
                    "validator": "boolean",
                    "timeoutMs": 200
                }]
            }]
        }]
    }"#,
    )
    .unwrap();

    let runner = ScenarioRunner::new(Arc::clone(&store), TesterConfig::default());
    let results = runner.run_document(&doc).await;

    cancel.cancel();
    engine_handle.await.unwrap();

    assert!(!results.all_passed());
    let failure = &results.results[0];
    assert!(!failure.success);
    let expectation = &failure.step_results[0].expectation_results[0];
    assert_eq!(expectation.key, "output:does_not_exist");
    assert!(!expectation.success);

    let text = render(&results, ReportFormat::Text);
    assert!(text.contains("expects_ghost_output"));
    assert!(text.contains("output:does_not_exist"));
}
