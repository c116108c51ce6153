use serde_json::json;

use super::aggregate::{final_score, structural_composite};
use super::generator::parse_generated_tasks;
use super::normalize::{normalize_reply, strip_code_fence};
use super::*;
use crate::baseline::{EvictionPolicy, LocalAgentTransport};
use crate::config::{BenchConfig, CategoryDescription};
use crate::model::{Persona, TaskSpec};
use crate::pipeline::testing::{FAILING_ITEM, ScriptedCompletion, ScriptedTransport, TableEmbedder};
use crate::transport::{AgentReply, AgentTransport, SendRequest};

const EVAL_TEMPLATE: &str = "<<task>> => <<output>>";

fn config(trial_count: usize) -> BenchConfig {
    BenchConfig {
        trial_count,
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
        ("Ronin", vec![1.0, 0.0]),
    ])
}

fn judges(generated: &str) -> ScriptedCompletion {
    ScriptedCompletion::new(Vec::new())
        .with_rule("task generator", generated)
        .with_rule("strict AI evaluator", r#"{"score": 0.9, "reason": "solid"}"#)
        .with_rule("explanation evaluator", "0.5")
}

fn persona() -> Persona {
    Persona::from_value(&json!({
        "name": "action_fan",
        "preferences": ["Action"],
        "history": ["Die Hard", "Speed"]
    }))
    .expect("persona literal should load")
}

fn evaluator<'a>(
    config: &'a BenchConfig,
    backend: &'a ScriptedCompletion,
    transport: &'a dyn AgentTransport,
    embedder: &'a TableEmbedder,
) -> Evaluator<'a> {
    Evaluator {
        config,
        generator: TaskGenerator::new(backend, "{{persona}} x{{task_count}}", "deepseek-chat", 0.0),
        dispatcher: Dispatcher::new(transport, "http://agent"),
        scorer: Scorer::new(backend, embedder, EVAL_TEMPLATE, config)
            .expect("scorer should build"),
    }
}

#[test]
fn later_transport_failures_leave_first_trial_only() {
    let transport = ScriptedTransport::replying(
        "```json\n{\"prediction\": [\"Heat\"], \"explanation\": \"likes action\"}\n```",
    )
    .failing_on(&[1, 2]);
    let dispatcher = Dispatcher::new(&transport, "http://agent");
    let task = TaskSpec::from_value(json!({"task_id": "t"}));

    let trials = dispatcher
        .run_trials(&task, 3)
        .ok()
        .expect("first trial succeeded");
    assert_eq!(trials.len(), 1);
    assert_eq!(
        trials.last_output().map(|output| output.prediction.clone()),
        Some(vec!["Heat".to_string()])
    );
}

#[test]
fn failed_task_is_excluded_and_persona_score_is_the_survivor() {
    let config = config(1);
    let backend = judges("[]");
    let embedder = embedder();
    // Task A predicts an item the embedder cannot handle; task B is fine.
    let transport = LocalAgentTransport::new(EvictionPolicy::Never);
    let evaluator = evaluator(&config, &backend, &transport, &embedder);

    let tasks = vec![
        TaskSpec::from_value(json!({"task_id": "A", "candidate_items": [FAILING_ITEM]})),
        TaskSpec::from_value(json!({
            "task_id": "B",
            "candidate_items": ["Heat", "Ronin"],
            "ground_truth": ["Heat"]
        })),
    ];

    let result = evaluator
        .evaluate_tasks(&persona(), tasks)
        .ok()
        .expect("one scored task should give a result");
    assert_eq!(result.tasks.len(), 1);
    assert_eq!(result.tasks[0].task_id, "B");
    assert_eq!(result.persona_score, result.tasks[0].final_score);
    assert!((0.0..=1.0).contains(&result.persona_score));
}

#[test]
fn generator_fallback_flows_through_without_raising() {
    let config = config(2);
    let backend = judges("Sorry, I cannot produce JSON today.");
    let embedder = embedder();
    let transport = ScriptedTransport::replying("not json either");
    let evaluator = evaluator(&config, &backend, &transport, &embedder);

    let result = evaluator
        .evaluate_persona(&persona())
        .ok()
        .expect("error marker task still produces a record");
    assert_eq!(result.tasks.len(), 1);

    let record = &result.tasks[0];
    assert_eq!(record.task_id, "task-unknown");
    assert_eq!(record.output.raw.as_deref(), Some("not json either"));
    assert_eq!(record.consistency, 0.0);
    assert_eq!(record.explainability, 0.0);
    assert_eq!(record.structural.precision, 0.0);
}

#[test]
fn user_history_is_overwritten_before_dispatch() {
    let config = config(1);
    let backend = judges(r#"[{"task_id": "h", "user_history": ["Generated Only"]}]"#);
    let embedder = embedder();
    let transport = ScriptedTransport::replying(r#"{"prediction": ["Heat"]}"#);
    let evaluator = evaluator(&config, &backend, &transport, &embedder);

    evaluator
        .evaluate_persona(&persona())
        .ok()
        .expect("persona should be scored");

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    let message: serde_json::Value =
        serde_json::from_str(&sent[0].message).expect("task message should be json");
    assert_eq!(message["user_history"], json!(["Die Hard", "Speed"]));
}

#[test]
fn every_trial_failing_skips_the_persona() {
    let config = config(2);
    let backend = judges(r#"[{"task_id": "x"}]"#);
    let embedder = embedder();
    let transport = ScriptedTransport::replying("{}").failing_on(&[0, 1]);
    let evaluator = evaluator(&config, &backend, &transport, &embedder);

    let outcome = evaluator.evaluate_persona(&persona());
    assert_eq!(outcome.status(), "skipped");
}

#[test]
fn parallel_run_keeps_input_order_and_publishes() {
    let config = config(1);
    let backend = judges(r#"[{"task_id": "p", "candidate_items": ["Heat"]}]"#);
    let embedder = embedder();
    let transport = LocalAgentTransport::new(EvictionPolicy::Never);
    let evaluator = evaluator(&config, &backend, &transport, &embedder);

    let personas = (0..5)
        .map(|index| {
            Persona::from_value(&json!({"name": format!("p{index}"), "preferences": ["Action"]}))
                .expect("persona literal should load")
        })
        .collect::<Vec<_>>();
    let refs = personas.iter().collect::<Vec<_>>();

    let dir = tempfile::tempdir().expect("tempdir should be created");
    let json_sink = JsonFileSink::new(dir.path());
    let ledger = LedgerSink::open(&dir.path().join("ledger.sqlite"), "run-test")
        .expect("ledger should open");
    let sinks: [&dyn ResultSink; 2] = [&json_sink, &ledger];

    let summaries = run_personas(&evaluator, &refs, 3, &sinks);
    let names = summaries
        .iter()
        .map(|summary| summary.persona.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["p0", "p1", "p2", "p3", "p4"]);
    assert!(summaries.iter().all(|summary| summary.sinks_published == 2));
    assert_eq!(transport.session_count(), 5);

    let rows = read_ledger_summary(&dir.path().join("ledger.sqlite"), Some("run-test"))
        .expect("ledger summary should load");
    assert_eq!(rows.len(), 5);
    assert!(dir.path().join("results_p3.json").exists());
}

#[test]
fn normalized_fenced_reply_round_trips() {
    let output = normalize_reply("```json\n{\"prediction\":[\"X\"]}\n```");
    assert_eq!(output.prediction, vec!["X"]);
    assert!(output.raw.is_none());
    assert_eq!(strip_code_fence("```json\n[]\n```"), "[]");
}

#[test]
fn generated_array_parses_through_public_entry_point() {
    let tasks = parse_generated_tasks(r#"[{"task_id": "a"}, {"task_id": "b"}]"#);
    assert_eq!(tasks.len(), 2);
}

#[test]
fn final_score_is_independent_of_structural_composite() {
    let weights = BenchConfig::default();
    let score = final_score(&weights.weights, 0.5, 0.5, 0.5);
    assert_eq!(score, 0.5);
    assert!(structural_composite(&weights.structural_weights, 1.0, 1.0, 1.0) > score);
}

#[test]
fn persona_store_from_personas_resolves_names() {
    let store = PersonaStore::from_personas([persona()]);
    assert!(store.get("action_fan").is_some());
    assert!(store.get("missing").is_none());
}

/// Delegates to the baseline agent but panics on tasks carrying `history`.
struct PanicOnHistory {
    inner: LocalAgentTransport,
    history: &'static str,
}

impl AgentTransport for PanicOnHistory {
    fn send(&self, request: &SendRequest<'_>) -> anyhow::Result<AgentReply> {
        if request.message.contains(self.history) {
            panic!("agent crashed on {}", self.history);
        }
        self.inner.send(request)
    }
}

#[test]
fn panicking_persona_is_reported_and_others_survive() {
    let config = config(1);
    let backend = judges(r#"[{"task_id": "p", "candidate_items": ["Heat"]}]"#);
    let embedder = embedder();
    let transport = PanicOnHistory {
        inner: LocalAgentTransport::new(EvictionPolicy::Never),
        history: "Crash Course",
    };
    let evaluator = evaluator(&config, &backend, &transport, &embedder);

    let personas = (0..4)
        .map(|index| {
            let history = if index == 1 { vec!["Crash Course"] } else { vec!["Heat"] };
            Persona::from_value(&json!({
                "name": format!("p{index}"),
                "preferences": ["Action"],
                "history": history
            }))
            .expect("persona literal should load")
        })
        .collect::<Vec<_>>();
    let refs = personas.iter().collect::<Vec<_>>();

    let no_sinks: [&dyn ResultSink; 0] = [];
    for jobs in [1, 2] {
        let summaries = run_personas(&evaluator, &refs, jobs, &no_sinks);
        let statuses = summaries
            .iter()
            .map(|summary| (summary.persona.as_str(), summary.status.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(
            statuses,
            vec![("p0", "ok"), ("p1", "failed"), ("p2", "ok"), ("p3", "ok")],
            "jobs = {jobs}"
        );
        assert!(
            summaries[1]
                .reason
                .as_deref()
                .is_some_and(|reason| reason.contains("Crash Course")),
            "reason: {:?}",
            summaries[1].reason
        );
    }
}
