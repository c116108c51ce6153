use crate::config::{FinalWeights, StructuralWeights};
use crate::model::{PersonaResult, ScoreRecord};
use crate::pipeline::outcome::StageOutcome;
use crate::util::{clamp_unit, mean, round4};

/// Weighted task score. Structural metrics never take part.
pub fn final_score(
    weights: &FinalWeights,
    semantic: f64,
    consistency: f64,
    explainability: f64,
) -> f64 {
    let weighted = weights.semantic * semantic
        + weights.consistency * consistency
        + weights.explainability * explainability;
    round4(clamp_unit(weighted))
}

/// Diagnostic composite of the ranking metrics. Reported, never aggregated.
pub fn structural_composite(
    weights: &StructuralWeights,
    precision: f64,
    recall: f64,
    ndcg: f64,
) -> f64 {
    clamp_unit(weights.precision * precision + weights.recall * recall + weights.ndcg * ndcg)
}

/// Persona score is the mean task score. No recorded task means no result.
pub fn aggregate_persona(persona: &str, records: Vec<ScoreRecord>) -> StageOutcome<PersonaResult> {
    let scores = records
        .iter()
        .map(|record| record.final_score)
        .collect::<Vec<f64>>();
    let Some(persona_score) = mean(&scores) else {
        return StageOutcome::Skipped(format!("no task of persona {persona} was scored"));
    };

    StageOutcome::Ok(PersonaResult {
        persona: persona.to_string(),
        persona_score: round4(persona_score),
        tasks: records,
    })
}
