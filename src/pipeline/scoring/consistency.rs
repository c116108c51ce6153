use std::collections::BTreeSet;

use anyhow::Result;

use crate::model::ParsedOutput;
use crate::semantic::{CategoryIndex, Embedder};
use crate::util::mean;

/// Mean over trials of the mean per-item Jaccard overlap between inferred
/// categories and the persona's preferences.
///
/// Items with no inferred category are left out of their trial's mean; a
/// trial with nothing left scores 0. No preferences or no trials scores 0.
pub fn score_consistency(
    preferences: &BTreeSet<String>,
    trials: &[ParsedOutput],
    index: &CategoryIndex,
    embedder: &dyn Embedder,
) -> Result<f64> {
    if preferences.is_empty() || trials.is_empty() {
        return Ok(0.0);
    }

    let mut trial_scores = Vec::with_capacity(trials.len());
    for output in trials {
        let mut item_scores = Vec::with_capacity(output.prediction.len());
        for item in &output.prediction {
            let inferred = index
                .infer(embedder, item)?
                .into_iter()
                .collect::<BTreeSet<String>>();
            if inferred.is_empty() {
                continue;
            }
            item_scores.push(jaccard(&inferred, preferences));
        }
        trial_scores.push(mean(&item_scores).unwrap_or(0.0));
    }

    Ok(mean(&trial_scores).unwrap_or(0.0))
}

fn jaccard(left: &BTreeSet<String>, right: &BTreeSet<String>) -> f64 {
    let union = left.union(right).count();
    if union == 0 {
        return 0.0;
    }
    left.intersection(right).count() as f64 / union as f64
}
