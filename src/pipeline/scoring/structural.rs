use crate::config::StructuralWeights;
use crate::model::{STRUCTURAL_ROLE, StructuralScores};
use crate::pipeline::aggregate::structural_composite;
use crate::util::{clamp_unit, round4};

pub fn precision_at_k(prediction: &[String], truth: &[String], k: usize) -> f64 {
    if k == 0 {
        return 0.0;
    }
    clamp_unit(hits_at_k(prediction, truth, k) as f64 / k as f64)
}

pub fn recall_at_k(prediction: &[String], truth: &[String], k: usize) -> f64 {
    if truth.is_empty() || k == 0 {
        return 0.0;
    }
    clamp_unit(hits_at_k(prediction, truth, k) as f64 / truth.len() as f64)
}

/// Binary-relevance nDCG. Truth is unordered, so the ideal ranking is any
/// ranking of the first `k` truth items.
pub fn ndcg_at_k(prediction: &[String], truth: &[String], k: usize) -> f64 {
    if truth.is_empty() || k == 0 {
        return 0.0;
    }

    let mut dcg = 0.0;
    for (index, item) in prediction.iter().take(k).enumerate() {
        if truth.contains(item) {
            dcg += discount(index);
        }
    }

    let idcg = (0..truth.len().min(k)).map(discount).sum::<f64>();
    if idcg <= 0.0 {
        return 0.0;
    }
    clamp_unit(dcg / idcg)
}

/// Diagnostic ranking metrics. All zero when either side is empty.
pub fn score_structural(
    prediction: &[String],
    truth: &[String],
    k: usize,
    weights: &StructuralWeights,
) -> StructuralScores {
    let (precision, recall, ndcg) = if prediction.is_empty() || truth.is_empty() {
        (0.0, 0.0, 0.0)
    } else {
        (
            precision_at_k(prediction, truth, k),
            recall_at_k(prediction, truth, k),
            ndcg_at_k(prediction, truth, k),
        )
    };

    StructuralScores {
        precision: round4(precision),
        recall: round4(recall),
        ndcg: round4(ndcg),
        score: round4(structural_composite(weights, precision, recall, ndcg)),
        role: STRUCTURAL_ROLE.to_string(),
    }
}

fn hits_at_k(prediction: &[String], truth: &[String], k: usize) -> usize {
    prediction
        .iter()
        .take(k)
        .filter(|item| truth.contains(item))
        .count()
}

fn discount(index: usize) -> f64 {
    1.0 / (index as f64 + 2.0).log2()
}
