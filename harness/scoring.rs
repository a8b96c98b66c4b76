//! Outcome scoring: how one selected set compares with the ground truth.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Confusion counts and rates for a single selected set.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutcomeStats {
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    /// `true_positives / k`, defined as 0 when `k == 0`.
    pub power: f64,
    /// `false_positives / max(selected, 1)`; an empty selection has FDR 0.
    pub fdr: f64,
}

impl OutcomeStats {
    pub fn selected(&self) -> usize {
        self.true_positives + self.false_positives
    }

    pub fn k(&self) -> usize {
        self.true_positives + self.false_negatives
    }
}

/// Scores `selected` against `true_support`, where `k == |true_support|`.
pub fn score(selected: &BTreeSet<usize>, true_support: &BTreeSet<usize>, k: usize) -> OutcomeStats {
    debug_assert_eq!(k, true_support.len());

    let true_positives = selected.intersection(true_support).count();
    let false_positives = selected.len() - true_positives;
    let false_negatives = true_support.len() - true_positives;

    let power = if k == 0 {
        0.0
    } else {
        true_positives as f64 / k as f64
    };
    let fdr = false_positives as f64 / selected.len().max(1) as f64;

    OutcomeStats {
        true_positives,
        false_positives,
        false_negatives,
        power,
        fdr,
    }
}
