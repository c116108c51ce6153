//! Per-task metrics: structural ranking quality, semantic correctness,
//! persona consistency and explainability.

mod consistency;
mod judge;
mod structural;
#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use tracing::debug;

use crate::config::BenchConfig;
use crate::llm::CompletionBackend;
use crate::model::{Persona, ScoreRecord, TaskSpec};
use crate::pipeline::aggregate::final_score;
use crate::pipeline::dispatcher::TrialSet;
use crate::pipeline::outcome::StageOutcome;
use crate::semantic::{CategoryIndex, Embedder};
use crate::util::round4;

use self::consistency::score_consistency;
use self::judge::Judge;
use self::structural::score_structural;

pub struct Scorer<'a> {
    judge: Judge<'a>,
    embedder: &'a dyn Embedder,
    categories: CategoryIndex,
    config: &'a BenchConfig,
}

impl<'a> Scorer<'a> {
    /// Embeds the category table once up front.
    pub fn new(
        backend: &'a dyn CompletionBackend,
        embedder: &'a dyn Embedder,
        eval_template: &'a str,
        config: &'a BenchConfig,
    ) -> Result<Self> {
        let categories =
            CategoryIndex::build(embedder, &config.categories, config.category_threshold)
                .context("failed to embed category descriptions")?;
        debug!(categories = categories.len(), "category index ready");

        Ok(Self {
            judge: Judge {
                backend,
                eval_template,
                model: &config.completion.model,
                temperature: config.completion.judge_temperature,
            },
            embedder,
            categories,
            config,
        })
    }

    /// Scores one task. Single-output metrics use the last successful trial;
    /// consistency uses every trial. A scoring error fails this task only.
    pub fn score_task(
        &self,
        task: &TaskSpec,
        persona: &Persona,
        trials: &TrialSet,
    ) -> StageOutcome<ScoreRecord> {
        let Some(last_output) = trials.last_output() else {
            return StageOutcome::Skipped(format!("task {} has no trial output", task.task_id));
        };

        let structural = score_structural(
            &last_output.prediction,
            &task.truth_labels(),
            self.config.top_k,
            &self.config.structural_weights,
        );
        let semantic = self.judge.semantic(task, last_output);
        let consistency = match score_consistency(
            &persona.preferences,
            trials.outputs(),
            &self.categories,
            self.embedder,
        )
        .with_context(|| format!("consistency scoring failed for task {}", task.task_id))
        {
            Ok(consistency) => consistency,
            Err(err) => return StageOutcome::Failed(format!("{err:#}")),
        };
        let explainability = self.judge.explainability(persona, last_output);

        let final_score = final_score(
            &self.config.weights,
            semantic.score,
            consistency,
            explainability,
        );
        debug!(
            task_id = %task.task_id,
            semantic = semantic.score,
            consistency,
            explainability,
            final_score,
            "task scored"
        );

        StageOutcome::Ok(ScoreRecord {
            task_id: task.task_id.clone(),
            instruction: task.instruction.clone(),
            output: last_output.clone(),
            structural,
            semantic: round4(semantic.score),
            semantic_reason: semantic.reason,
            consistency: round4(consistency),
            explainability: round4(explainability),
            final_score,
        })
    }
}
