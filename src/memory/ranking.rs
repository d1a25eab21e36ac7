//! Score fusion, temporal decay, and MMR re-ranking.

use std::collections::{HashMap, HashSet};

/// Min-max normalize scores into [0, 1]. A degenerate list (all scores
/// equal) maps to 1.0 so that downstream decay still differentiates.
pub fn min_max_normalize(scores: &mut HashMap<String, f64>) {
    let (mut min, mut max) = (f64::INFINITY, f64::NEG_INFINITY);
    for score in scores.values() {
        min = min.min(*score);
        max = max.max(*score);
    }
    if !min.is_finite() || !max.is_finite() {
        return;
    }
    let range = max - min;
    for score in scores.values_mut() {
        *score = if range > f64::EPSILON {
            (*score - min) / range
        } else {
            1.0
        };
    }
}

/// `merged = alpha·vector + beta·bm25`; ids missing from a list score 0
/// on that side.
pub fn fuse(
    vector: &HashMap<String, f64>,
    bm25: &HashMap<String, f64>,
    alpha: f64,
    beta: f64,
) -> HashMap<String, f64> {
    let mut merged = HashMap::new();
    let ids: HashSet<&String> = vector.keys().chain(bm25.keys()).collect();
    for id in ids {
        let v = vector.get(id).copied().unwrap_or(0.0);
        let b = bm25.get(id).copied().unwrap_or(0.0);
        merged.insert(id.clone(), alpha * v + beta * b);
    }
    merged
}

/// `score · 2^(−days / half_life)`. Monotonically non-increasing in age.
pub fn temporal_decay(score: f64, days: f64, half_life_days: f64) -> f64 {
    if half_life_days <= 0.0 {
        return score;
    }
    score * 2f64.powf(-days.max(0.0) / half_life_days)
}

/// Cosine similarity; 0.0 for mismatched or zero-length vectors.
pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut na, mut nb) = (0f64, 0f64, 0f64);
    for (x, y) in a.iter().zip(b) {
        dot += f64::from(*x) * f64::from(*y);
        na += f64::from(*x) * f64::from(*x);
        nb += f64::from(*y) * f64::from(*y);
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

fn word_set(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect()
}

/// Jaccard word-overlap similarity.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let (a, b) = (word_set(a), word_set(b));
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(&b).count() as f64;
    let union = a.union(&b).count() as f64;
    intersection / union
}

/// Greedy Maximal Marginal Relevance selection over `(content, relevance)`
/// candidates: `MMR = λ·relevance − (1−λ)·max_sim(selected, candidate)`.
/// Returns indices into `candidates` in selection order.
pub fn mmr_select(candidates: &[(String, f64)], lambda: f64, k: usize) -> Vec<usize> {
    let mut selected: Vec<usize> = Vec::new();
    let mut remaining: Vec<usize> = (0..candidates.len()).collect();

    while selected.len() < k && !remaining.is_empty() {
        let mut best: Option<(usize, f64)> = None;
        for (pos, &i) in remaining.iter().enumerate() {
            let max_sim = selected
                .iter()
                .map(|&j| jaccard(&candidates[i].0, &candidates[j].0))
                .fold(0.0, f64::max);
            let mmr = lambda * candidates[i].1 - (1.0 - lambda) * max_sim;
            match best {
                Some((_, best_score)) if mmr <= best_score => {}
                _ => best = Some((pos, mmr)),
            }
        }
        if let Some((pos, _)) = best {
            selected.push(remaining.remove(pos));
        }
    }
    selected
}
