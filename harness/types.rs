use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::ops::Deref;
use thiserror::Error;

/// Indices of the variables a selector kept, in ascending order.
#[repr(transparent)]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedSet(pub BTreeSet<usize>);

impl Deref for SelectedSet {
    type Target = BTreeSet<usize>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromIterator<usize> for SelectedSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// The ground truth: positions carrying a non-zero coefficient in the generative model.
#[repr(transparent)]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrueSupport(pub BTreeSet<usize>);

impl TrueSupport {
    /// Number of causal variables, `k`.
    pub fn k(&self) -> usize {
        self.0.len()
    }
}

impl Deref for TrueSupport {
    type Target = BTreeSet<usize>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromIterator<usize> for TrueSupport {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Raised when a knockoff selector hands back a different number of selected sets
/// than there are FDR targets. Never truncated or padded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("knockoff selector returned {found} selected sets for {expected} FDR targets")]
pub struct AlignmentError {
    pub expected: usize,
    pub found: usize,
}

/// One target FDR level together with the variables selected at that level.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSelection {
    pub target: f64,
    pub selected: SelectedSet,
}

/// The knockoff filter's output for a whole threshold sweep.
///
/// Targets and selected sets live in the same entries, so there is no second
/// independently indexed sequence that could drift out of step with the first.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KnockoffSelection {
    thresholds: Vec<ThresholdSelection>,
}

impl KnockoffSelection {
    /// Pairs `targets[j]` with `sets[j]`. Fails unless both have the same length.
    pub fn zip(targets: &[f64], sets: Vec<SelectedSet>) -> Result<Self, AlignmentError> {
        if targets.len() != sets.len() {
            return Err(AlignmentError {
                expected: targets.len(),
                found: sets.len(),
            });
        }
        let thresholds = targets
            .iter()
            .zip(sets)
            .map(|(&target, selected)| ThresholdSelection { target, selected })
            .collect();
        Ok(Self { thresholds })
    }

    pub fn len(&self) -> usize {
        self.thresholds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }

    pub fn get(&self, threshold_index: usize) -> Option<&ThresholdSelection> {
        self.thresholds.get(threshold_index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ThresholdSelection> {
        self.thresholds.iter()
    }

    pub fn targets(&self) -> Vec<f64> {
        self.thresholds.iter().map(|entry| entry.target).collect()
    }
}

impl<'a> IntoIterator for &'a KnockoffSelection {
    type Item = &'a ThresholdSelection;
    type IntoIter = std::slice::Iter<'a, ThresholdSelection>;

    fn into_iter(self) -> Self::IntoIter {
        self.thresholds.iter()
    }
}
