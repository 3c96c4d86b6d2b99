//! Dependency planning regressions
//!
//! Exercises layering and rejection behavior on larger rule sets than the
//! unit tests: diamond dependencies, deep chains, cycle reporting, and the
//! layer-index law (every producer sits strictly below its consumers).

use vigil::rules::{load_str, plan, PlanError};

fn rule(name: &str, reads: &[&str], writes: &str) -> String {
    let conditions: String = reads
        .iter()
        .map(|sensor| {
            format!(
                "        - type: comparison\n          sensor: {sensor}\n          operator: \">\"\n          value: 0\n"
            )
        })
        .collect();
    format!(
        "  - name: {name}\n    conditions:\n      all:\n{conditions}    actions:\n      - type: set_value\n        key: {writes}\n        value: 1\n"
    )
}

fn doc(rules: &[String]) -> String {
    format!("version: 3\nrules:\n{}", rules.join(""))
}

#[test]
fn diamond_dependencies_layer_correctly() {
    // source -> (left, right) -> sink
    let document = doc(&[
        rule("source", &["input:raw"], "output:base"),
        rule("left", &["output:base"], "output:left"),
        rule("right", &["output:base"], "output:right"),
        rule("sink", &["output:left", "output:right"], "output:final"),
    ]);
    let set = load_str(&document, "diamond.yaml").unwrap();
    let plan = plan(&set, 100).unwrap();

    assert_eq!(plan.layers.len(), 3);
    assert_eq!(plan.layers[0], vec![0]);
    assert_eq!(plan.layers[1], vec![1, 2]);
    assert_eq!(plan.layers[2], vec![3]);
}

#[test]
fn every_edge_crosses_layers_downward() {
    let document = doc(&[
        rule("a", &["input:x"], "output:a"),
        rule("b", &["output:a"], "output:b"),
        rule("c", &["output:b", "output:a"], "output:c"),
        rule("d", &["input:y"], "output:d"),
        rule("e", &["output:d", "output:c"], "output:e"),
    ]);
    let set = load_str(&document, "chain.yaml").unwrap();
    let plan = plan(&set, 100).unwrap();

    for (output, &producer) in &plan.producers {
        for (consumer, analysis) in plan.analyses.iter().enumerate() {
            if consumer == producer {
                continue;
            }
            if analysis.referenced_sensors.contains(output) {
                assert!(
                    plan.layer_of(producer).unwrap() < plan.layer_of(consumer).unwrap(),
                    "edge {} -> {} does not cross layers downward",
                    set.rules[producer].name,
                    set.rules[consumer].name
                );
            }
        }
    }
}

#[test]
fn three_rule_cycle_is_reported_in_path_order() {
    let document = doc(&[
        rule("a", &["output:c"], "output:a"),
        rule("b", &["output:a"], "output:b"),
        rule("c", &["output:b"], "output:c"),
    ]);
    let set = load_str(&document, "cycle.yaml").unwrap();
    match plan(&set, 100) {
        Err(PlanError::CyclicDependency { path }) => {
            // The loop closes on itself and names all three rules.
            assert_eq!(path.first(), path.last());
            for name in ["a", "b", "c"] {
                assert!(path.contains(&name.to_string()), "missing '{name}' in {path:?}");
            }
        }
        other => panic!("expected a cycle error, got {other:?}"),
    }
}

#[test]
fn self_referencing_rule_is_not_a_cycle() {
    // A rule may read the output it produced last cycle; that is not an
    // edge to itself.
    let document = doc(&[rule("accumulator", &["output:total", "input:x"], "output:total")]);
    let set = load_str(&document, "self.yaml").unwrap();
    let plan = plan(&set, 100).unwrap();
    assert_eq!(plan.layers.len(), 1);
}

#[test]
fn mixed_independent_and_dependent_rules() {
    let document = doc(&[
        rule("standalone_one", &["input:a"], "output:one"),
        rule("standalone_two", &["input:b"], "output:two"),
        rule("combiner", &["output:one", "output:two"], "output:both"),
        rule("standalone_three", &["input:c"], "output:three"),
    ]);
    let set = load_str(&document, "mixed.yaml").unwrap();
    let plan = plan(&set, 100).unwrap();

    assert_eq!(plan.layers.len(), 2);
    // All three independent rules share layer 0.
    assert_eq!(plan.layers[0], vec![0, 1, 3]);
    assert_eq!(plan.layers[1], vec![2]);
    // The snapshot covers exactly the referenced inputs.
    let inputs: Vec<&str> = plan.input_keys.iter().map(String::as_str).collect();
    assert_eq!(inputs, vec!["input:a", "input:b", "input:c"]);
}
