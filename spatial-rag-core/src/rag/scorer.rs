//! Hybrid ranking of candidates.
//!
//! ```text
//! hybrid = alpha * (1 - cosine_distance) + beta * 1 / (1 + distance_m)
//! ```
//!
//! Without a spatial constraint the beta term is dropped entirely, so a
//! purely semantic query ranks by `alpha * semantic` alone.

use super::types::{Candidate, ScoredDocument, Scores};
use crate::config::RetrievalConfig;
use std::cmp::Ordering;

/// Cosine distance lives in `[0, 2]`; anything else is clamped into range.
pub fn semantic_similarity(cosine_distance: f64) -> f64 {
    let distance = if cosine_distance.is_finite() {
        cosine_distance.clamp(0.0, 2.0)
    } else {
        2.0
    };
    1.0 - distance
}

/// `1 / (1 + d)`: 1.0 at the reference point, strictly decreasing with distance.
pub fn spatial_score(distance_m: f64) -> f64 {
    if distance_m.is_nan() {
        return 0.0;
    }
    1.0 / (1.0 + distance_m.max(0.0))
}

pub fn hybrid_score(alpha: f64, beta: f64, semantic: f64, spatial: Option<f64>) -> f64 {
    match spatial {
        Some(spatial) => alpha * semantic + beta * spatial,
        None => alpha * semantic,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HybridScorer {
    alpha: f64,
    beta: f64,
}

impl HybridScorer {
    pub fn new(alpha: f64, beta: f64) -> Self {
        Self { alpha, beta }
    }

    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self::new(config.alpha, config.beta)
    }

    pub fn score(&self, cosine_distance: f64, distance_m: Option<f64>) -> Scores {
        let semantic = semantic_similarity(cosine_distance);
        let spatial = distance_m.map(spatial_score);
        Scores {
            semantic,
            spatial,
            hybrid: hybrid_score(self.alpha, self.beta, semantic, spatial),
        }
    }

    pub fn score_candidate(&self, candidate: Candidate) -> ScoredDocument {
        let scores = self.score(candidate.semantic_distance, candidate.spatial_distance_m);
        ScoredDocument {
            document: candidate.document,
            scores,
            spatial_distance_m: candidate.spatial_distance_m,
        }
    }

    /// Scores, ranks and truncates a batch of candidates.
    ///
    /// Duplicate ids keep their best-ranked occurrence only.
    pub fn rank(&self, candidates: Vec<Candidate>, top_k: usize) -> Vec<ScoredDocument> {
        let mut scored: Vec<ScoredDocument> = candidates
            .into_iter()
            .map(|c| self.score_candidate(c))
            .collect();
        sort_ranked(&mut scored);

        let mut seen = std::collections::HashSet::new();
        scored.retain(|doc| seen.insert(doc.document.id.clone()));
        scored.truncate(top_k);
        scored
    }
}

/// Hybrid score descending, then id ascending.
pub fn sort_ranked(docs: &mut [ScoredDocument]) {
    docs.sort_by(|a, b| match b.scores.hybrid.total_cmp(&a.scores.hybrid) {
        Ordering::Equal => a.document.id.cmp(&b.document.id),
        other => other,
    });
}
