use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::BenchConfig;
use crate::model::{Persona, PersonaResult, TaskSpec};
use crate::pipeline::aggregate::aggregate_persona;
use crate::pipeline::dispatcher::Dispatcher;
use crate::pipeline::generator::TaskGenerator;
use crate::pipeline::outcome::StageOutcome;
use crate::pipeline::scoring::Scorer;
use crate::pipeline::sink::{ResultSink, publish_all};

/// The per-persona pipeline: generate, dispatch, score, aggregate.
pub struct Evaluator<'a> {
    pub config: &'a BenchConfig,
    pub generator: TaskGenerator<'a>,
    pub dispatcher: Dispatcher<'a>,
    pub scorer: Scorer<'a>,
}

impl Evaluator<'_> {
    pub fn evaluate_persona(&self, persona: &Persona) -> StageOutcome<PersonaResult> {
        let tasks = self.generator.generate(persona, self.config.task_count);
        self.evaluate_tasks(persona, tasks)
    }

    /// Runs already generated tasks. Each task's `user_history` is replaced by
    /// the persona's history before dispatch. A task that yields no trials or
    /// fails scoring is left out of the result.
    pub fn evaluate_tasks(
        &self,
        persona: &Persona,
        tasks: Vec<TaskSpec>,
    ) -> StageOutcome<PersonaResult> {
        let mut records = Vec::with_capacity(tasks.len());

        for mut task in tasks {
            task.user_history = persona.history.clone();

            let trials = match self.dispatcher.run_trials(&task, self.config.trial_count) {
                StageOutcome::Ok(trials) => trials,
                other => {
                    warn!(
                        persona = %persona.name,
                        task_id = %task.task_id,
                        status = other.status(),
                        reason = other.reason().unwrap_or_default(),
                        "task skipped"
                    );
                    continue;
                }
            };
            debug!(
                persona = %persona.name,
                task_id = %task.task_id,
                trials = trials.len(),
                failed = trials.failed_count(),
                "trials collected"
            );

            match self.scorer.score_task(&task, persona, &trials) {
                StageOutcome::Ok(record) => records.push(record),
                other => warn!(
                    persona = %persona.name,
                    task_id = %task.task_id,
                    status = other.status(),
                    reason = other.reason().unwrap_or_default(),
                    "task excluded from persona result"
                ),
            }
        }

        aggregate_persona(&persona.name, records)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersonaRunSummary {
    pub persona: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona_score: Option<f64>,
    pub tasks_scored: usize,
    pub sinks_published: usize,
}

/// Evaluates personas with up to `jobs` worker threads and publishes every
/// result to `sinks`. Summaries come back in input order. A panic while
/// evaluating one persona marks only that persona failed.
pub fn run_personas(
    evaluator: &Evaluator<'_>,
    personas: &[&Persona],
    jobs: usize,
    sinks: &[&dyn ResultSink],
) -> Vec<PersonaRunSummary> {
    let jobs = jobs.clamp(1, personas.len().max(1));
    if jobs == 1 {
        return personas
            .iter()
            .map(|persona| run_guarded(evaluator, persona, sinks))
            .collect();
    }

    let next = AtomicUsize::new(0);
    let mut indexed = thread::scope(|scope| {
        let next = &next;
        let handles = (0..jobs)
            .map(|_| {
                scope.spawn(move || {
                    let mut done = Vec::new();
                    loop {
                        let index = next.fetch_add(1, Ordering::Relaxed);
                        let Some(persona) = personas.get(index) else {
                            break;
                        };
                        done.push((index, run_guarded(evaluator, persona, sinks)));
                    }
                    done
                })
            })
            .collect::<Vec<_>>();

        let mut collected = Vec::with_capacity(personas.len());
        for handle in handles {
            match handle.join() {
                Ok(done) => collected.extend(done),
                Err(_) => error!("persona worker panicked"),
            }
        }
        collected
    });

    indexed.sort_by_key(|(index, _)| *index);
    indexed.into_iter().map(|(_, summary)| summary).collect()
}

fn run_guarded(
    evaluator: &Evaluator<'_>,
    persona: &Persona,
    sinks: &[&dyn ResultSink],
) -> PersonaRunSummary {
    panic::catch_unwind(AssertUnwindSafe(|| run_one(evaluator, persona, sinks))).unwrap_or_else(
        |payload| {
            let reason = format!("evaluation panicked: {}", panic_message(payload.as_ref()));
            error!(persona = %persona.name, reason = %reason, "persona evaluation aborted");
            PersonaRunSummary {
                persona: persona.name.clone(),
                status: "failed".to_string(),
                reason: Some(reason),
                persona_score: None,
                tasks_scored: 0,
                sinks_published: 0,
            }
        },
    )
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

fn run_one(
    evaluator: &Evaluator<'_>,
    persona: &Persona,
    sinks: &[&dyn ResultSink],
) -> PersonaRunSummary {
    info!(persona = %persona.name, "evaluating persona");

    match evaluator.evaluate_persona(persona) {
        StageOutcome::Ok(result) => {
            let sinks_published = publish_all(sinks, &result);
            info!(
                persona = %persona.name,
                persona_score = result.persona_score,
                tasks = result.tasks.len(),
                "persona evaluated"
            );
            PersonaRunSummary {
                persona: persona.name.clone(),
                status: "ok".to_string(),
                reason: None,
                persona_score: Some(result.persona_score),
                tasks_scored: result.tasks.len(),
                sinks_published,
            }
        }
        other => {
            warn!(
                persona = %persona.name,
                status = other.status(),
                reason = other.reason().unwrap_or_default(),
                "no result for persona"
            );
            PersonaRunSummary {
                persona: persona.name.clone(),
                status: other.status().to_string(),
                reason: other.reason().map(str::to_string),
                persona_score: None,
                tasks_scored: 0,
                sinks_published: 0,
            }
        }
    }
}
