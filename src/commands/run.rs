use std::collections::BTreeSet;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::baseline::{EvictionPolicy, LocalAgentTransport};
use crate::cli::{LOCAL_TARGET, RunArgs, default_ledger_path};
use crate::config::{BenchConfig, PromptTemplates};
use crate::llm::ChatCompletionClient;
use crate::model::Persona;
use crate::pipeline::{
    Dispatcher, Evaluator, JsonFileSink, LedgerSink, PersonaRunSummary, PersonaStore, ResultSink,
    Scorer, TaskGenerator, run_personas,
};
use crate::semantic::build_embedder;
use crate::transport::{A2aTransport, AgentTransport};
use crate::util::{ensure_directory, now_utc_string, utc_compact_string, write_json_pretty};

#[derive(Debug, Clone, Serialize)]
struct SkippedPersona {
    persona: String,
    reason: String,
}

#[derive(Debug, Clone, Serialize)]
struct RunManifest {
    manifest_version: u32,
    run_id: String,
    started_at: String,
    finished_at: String,
    target: String,
    task_count: usize,
    trial_count: usize,
    jobs: usize,
    persona_dir: String,
    results_dir: String,
    ledger_path: Option<String>,
    embedding_model: String,
    completion_model: String,
    personas_evaluated: Vec<PersonaRunSummary>,
    personas_skipped: Vec<SkippedPersona>,
    tasks_scored: usize,
}

pub fn run(args: RunArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!(
        "run-{}-{}",
        utc_compact_string(started_ts),
        &Uuid::new_v4().simple().to_string()[..8]
    );

    let config = BenchConfig::load(args.config.as_deref())?
        .with_overrides(args.task_count, args.trial_count);
    let templates = PromptTemplates::load(&args.prompts_dir)?;
    let store = PersonaStore::load(&args.persona_dir)?;
    ensure_directory(&args.results_dir)?;

    info!(
        run_id = %run_id,
        target = %args.target,
        personas = store.len(),
        task_count = config.task_count,
        trial_count = config.trial_count,
        jobs = args.jobs,
        "starting benchmark run"
    );

    let (selected, personas_skipped) = select_personas(&store, &args.personas);
    if selected.is_empty() {
        warn!(persona_dir = %args.persona_dir.display(), "no personas to evaluate");
    }

    let completion = ChatCompletionClient::from_config(&config.completion)?;
    if !completion.has_api_key() {
        warn!(
            env = %config.completion.api_key_env,
            "completion API key not set, generator and judges will degrade"
        );
    }
    let embedder = build_embedder(&config.embedding)?;

    let local_agent = (args.target == LOCAL_TARGET)
        .then(|| LocalAgentTransport::new(EvictionPolicy::default()));
    let remote_agent;
    let transport: &dyn AgentTransport = match &local_agent {
        Some(local) => local,
        None => {
            remote_agent = A2aTransport::from_config(&config.transport)?;
            &remote_agent
        }
    };

    let json_sink = JsonFileSink::new(&args.results_dir);
    let ledger_path = (!args.no_ledger).then(|| {
        args.ledger_path
            .clone()
            .unwrap_or_else(|| default_ledger_path(&args.results_dir))
    });
    let ledger = match &ledger_path {
        Some(path) => Some(LedgerSink::open(path, &run_id)?),
        None => None,
    };
    let mut sinks: Vec<&dyn ResultSink> = vec![&json_sink];
    if let Some(ledger) = &ledger {
        sinks.push(ledger);
    }

    let evaluator = Evaluator {
        config: &config,
        generator: TaskGenerator::new(
            &completion,
            &templates.task_prompt,
            &config.completion.model,
            config.completion.generation_temperature,
        ),
        dispatcher: Dispatcher::new(transport, &args.target),
        scorer: Scorer::new(&completion, embedder.as_ref(), &templates.eval_prompt, &config)?,
    };

    let summaries = run_personas(&evaluator, &selected, args.jobs, &sinks);
    let tasks_scored: usize = summaries.iter().map(|summary| summary.tasks_scored).sum();
    let scored = summaries
        .iter()
        .filter(|summary| summary.persona_score.is_some())
        .count();

    if let Some(local) = &local_agent {
        info!(sessions = local.session_count(), "baseline agent sessions");
    }

    let manifest = RunManifest {
        manifest_version: 1,
        run_id: run_id.clone(),
        started_at,
        finished_at: now_utc_string(),
        target: args.target.clone(),
        task_count: config.task_count,
        trial_count: config.trial_count,
        jobs: args.jobs,
        persona_dir: args.persona_dir.display().to_string(),
        results_dir: args.results_dir.display().to_string(),
        ledger_path: ledger_path.map(|path| path.display().to_string()),
        embedding_model: embedder.model_id().to_string(),
        completion_model: config.completion.model.clone(),
        personas_evaluated: summaries,
        personas_skipped,
        tasks_scored,
    };
    let manifest_path = args.results_dir.join(format!("{run_id}.json"));
    write_json_pretty(&manifest_path, &manifest)
        .with_context(|| format!("failed to write run manifest for {run_id}"))?;

    info!(
        run_id = %run_id,
        path = %manifest_path.display(),
        personas_scored = scored,
        tasks_scored,
        "benchmark run completed"
    );
    Ok(())
}

/// Requested personas in name order. Names that are not loaded come back as
/// skipped entries instead of failing the run.
fn select_personas<'s>(
    store: &'s PersonaStore,
    requested: &[String],
) -> (Vec<&'s Persona>, Vec<SkippedPersona>) {
    if requested.is_empty() {
        return (
            store.names().filter_map(|name| store.get(name)).collect(),
            Vec::new(),
        );
    }

    let mut selected = Vec::new();
    let mut skipped = Vec::new();
    for name in requested.iter().collect::<BTreeSet<_>>() {
        match store.get(name) {
            Some(persona) => selected.push(persona),
            None => {
                warn!(persona = %name, "requested persona not loaded, skipping");
                skipped.push(SkippedPersona {
                    persona: name.clone(),
                    reason: "persona not loaded".to_string(),
                });
            }
        }
    }
    (selected, skipped)
}
