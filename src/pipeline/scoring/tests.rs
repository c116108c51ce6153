use serde_json::json;

use super::*;
use crate::config::CategoryDescription;
use crate::model::ParsedOutput;
use crate::pipeline::testing::{ScriptedCompletion, TableEmbedder};

fn config() -> BenchConfig {
    BenchConfig {
        categories: vec![
            CategoryDescription {
                label: "Action".to_string(),
                description: "action".to_string(),
            },
            CategoryDescription {
                label: "Drama".to_string(),
                description: "drama".to_string(),
            },
        ],
        ..BenchConfig::default()
    }
}

fn embedder() -> TableEmbedder {
    TableEmbedder::new(&[
        ("action", vec![1.0, 0.0]),
        ("drama", vec![0.0, 1.0]),
        ("Heat", vec![1.0, 0.0]),
        ("Up", vec![0.0, 1.0]),
    ])
}

fn judges() -> ScriptedCompletion {
    ScriptedCompletion::new(Vec::new())
        .with_rule("strict AI evaluator", r#"{"score": 0.8, "reason": "relevant"}"#)
        .with_rule("explanation evaluator", "0.5")
}

fn persona(preferences: &[&str]) -> Persona {
    Persona::from_value(&json!({"name": "fan", "preferences": preferences}))
        .expect("persona literal should load")
}

fn task() -> TaskSpec {
    TaskSpec::from_value(json!({
        "task_id": "t-1",
        "instruction": "Pick action films",
        "candidate_items": ["Heat", "Up"],
        "ground_truth": [{"title": "Heat"}]
    }))
}

fn trials(items: &[&[&str]]) -> TrialSet {
    TrialSet::from_outputs(
        items
            .iter()
            .map(|prediction| ParsedOutput {
                prediction: prediction.iter().map(|item| item.to_string()).collect(),
                explanation: "fits the action preference".to_string(),
                ..ParsedOutput::default()
            })
            .collect(),
    )
}

#[test]
fn score_task_combines_all_four_metrics() {
    let config = config();
    let backend = judges();
    let embedder = embedder();
    let scorer = Scorer::new(&backend, &embedder, "<<task>> <<output>>", &config)
        .expect("scorer should build");

    let record = scorer
        .score_task(&task(), &persona(&["Action"]), &trials(&[&["Up"], &["Heat", "Up"]]))
        .ok()
        .expect("task should score");

    assert_eq!(record.task_id, "t-1");
    assert_eq!(record.instruction, "Pick action films");
    assert_eq!(record.output.prediction, vec!["Heat", "Up"]);
    assert_eq!(record.structural.precision, 0.2);
    assert_eq!(record.structural.recall, 1.0);
    assert_eq!(record.semantic, 0.8);
    assert_eq!(record.semantic_reason, "relevant");
    // Trial one: Up -> {Drama} scores 0. Trial two: Heat 1, Up 0 -> 0.5.
    assert_eq!(record.consistency, 0.25);
    assert_eq!(record.explainability, 0.5);
    assert_eq!(record.final_score, 0.63);
}

#[test]
fn final_score_ignores_structural_metrics() {
    let config = config();
    let backend = judges();
    let embedder = embedder();
    let scorer = Scorer::new(&backend, &embedder, "<<task>>", &config)
        .expect("scorer should build");

    let mut unrelated_truth = task();
    unrelated_truth.ground_truth.clear();

    let with_truth = scorer
        .score_task(&task(), &persona(&["Action"]), &trials(&[&["Heat"]]))
        .ok()
        .expect("task should score");
    let without_truth = scorer
        .score_task(&unrelated_truth, &persona(&["Action"]), &trials(&[&["Heat"]]))
        .ok()
        .expect("task should score");

    assert_ne!(with_truth.structural, without_truth.structural);
    assert_eq!(with_truth.final_score, without_truth.final_score);
    assert!((0.0..=1.0).contains(&with_truth.final_score));
}

#[test]
fn consistency_is_zero_without_preferences() {
    let config = config();
    let backend = judges();
    let embedder = embedder();
    let scorer = Scorer::new(&backend, &embedder, "<<task>>", &config)
        .expect("scorer should build");

    let record = scorer
        .score_task(&task(), &persona(&[]), &trials(&[&["Heat"], &["Heat"]]))
        .ok()
        .expect("task should score");
    assert_eq!(record.consistency, 0.0);
}

#[test]
fn embedder_error_fails_only_this_task() {
    let config = config();
    let backend = judges();
    let embedder = embedder();
    let scorer = Scorer::new(&backend, &embedder, "<<task>>", &config)
        .expect("scorer should build");

    let outcome = scorer.score_task(&task(), &persona(&["Action"]), &trials(&[&["BOOM"]]));
    assert_eq!(outcome.status(), "failed");
    assert!(
        outcome.reason().is_some_and(|reason| reason.contains("t-1")),
        "reason should name the task: {:?}",
        outcome.reason()
    );
}
