//! Reduction of per-simulation outcomes into averaged curves.
//!
//! Sums are accumulated per threshold and only normalized once every expected
//! simulation has either contributed or been skipped.

use crate::scoring::OutcomeStats;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AggregateError {
    #[error("Simulation {sim} produced {found} threshold outcomes, expected {expected}.")]
    Misaligned {
        sim: usize,
        expected: usize,
        found: usize,
    },
    #[error(
        "Aggregation finalized early: {contributed} contributed and {skipped} skipped out of {expected} simulations."
    )]
    Incomplete {
        contributed: usize,
        skipped: usize,
        expected: usize,
    },
    #[error("Every simulation was skipped; there is nothing to average.")]
    NoContributions,
}

/// Running per-threshold sums over the simulations folded so far.
#[derive(Debug, Clone)]
pub struct AggregateStats {
    fdr_targets: Vec<f64>,
    expected_runs: usize,
    power_sum: Vec<f64>,
    fdr_sum: Vec<f64>,
    selected_sum: Vec<f64>,
    contributed: usize,
    skipped: usize,
}

/// Averaged knockoff power and FDR, aligned entry by entry with `fdr_targets`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnockoffCurves {
    pub fdr_targets: Vec<f64>,
    pub power: Vec<f64>,
    pub fdr: Vec<f64>,
    /// Mean size of the selected set.
    pub selected: Vec<f64>,
    pub runs: usize,
}

/// One row of [`KnockoffCurves`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSummary {
    pub target: f64,
    pub power: f64,
    pub fdr: f64,
    pub mean_selected: f64,
}

impl KnockoffCurves {
    pub fn len(&self) -> usize {
        self.fdr_targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fdr_targets.is_empty()
    }

    pub fn summaries(&self) -> Vec<ThresholdSummary> {
        (0..self.len())
            .map(|j| ThresholdSummary {
                target: self.fdr_targets[j],
                power: self.power[j],
                fdr: self.fdr[j],
                mean_selected: self.selected[j],
            })
            .collect()
    }
}

impl AggregateStats {
    pub fn new(fdr_targets: &[f64], expected_runs: usize) -> Self {
        let width = fdr_targets.len();
        Self {
            fdr_targets: fdr_targets.to_vec(),
            expected_runs,
            power_sum: vec![0.0; width],
            fdr_sum: vec![0.0; width],
            selected_sum: vec![0.0; width],
            contributed: 0,
            skipped: 0,
        }
    }

    /// Adds one simulation's outcomes, one per threshold.
    pub fn fold(&mut self, sim: usize, outcomes: &[OutcomeStats]) -> Result<(), AggregateError> {
        if outcomes.len() != self.fdr_targets.len() {
            return Err(AggregateError::Misaligned {
                sim,
                expected: self.fdr_targets.len(),
                found: outcomes.len(),
            });
        }
        for (threshold, outcome) in outcomes.iter().enumerate() {
            self.power_sum[threshold] += outcome.power;
            self.fdr_sum[threshold] += outcome.fdr;
            self.selected_sum[threshold] += outcome.selected() as f64;
        }
        self.contributed += 1;
        Ok(())
    }

    pub fn record_skip(&mut self) {
        self.skipped += 1;
    }

    pub fn contributed(&self) -> usize {
        self.contributed
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Means over the contributing runs. Does not consume the sums.
    pub fn finalize(&self) -> Result<KnockoffCurves, AggregateError> {
        if self.contributed + self.skipped != self.expected_runs {
            return Err(AggregateError::Incomplete {
                contributed: self.contributed,
                skipped: self.skipped,
                expected: self.expected_runs,
            });
        }
        if self.contributed == 0 {
            return Err(AggregateError::NoContributions);
        }
        let runs = self.contributed as f64;
        let mean = |sums: &[f64]| sums.iter().map(|s| s / runs).collect::<Vec<_>>();
        Ok(KnockoffCurves {
            fdr_targets: self.fdr_targets.clone(),
            power: mean(&self.power_sum),
            fdr: mean(&self.fdr_sum),
            selected: mean(&self.selected_sum),
            runs: self.contributed,
        })
    }
}

/// Lasso statistics, averaged over however many fits were run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LassoBaseline {
    pub power: f64,
    pub fdr: f64,
    pub selected: f64,
    pub true_positives: f64,
    pub false_positives: f64,
    pub false_negatives: f64,
    /// Mean cross-validated λ over the fits that reported one.
    pub lambda: Option<f64>,
    pub runs: usize,
}

impl LassoBaseline {
    /// `None` when no lasso fit contributed.
    pub fn from_runs(runs: &[OutcomeStats], lambdas: &[f64]) -> Option<Self> {
        if runs.is_empty() {
            return None;
        }
        let count = runs.len() as f64;
        let mean = |field: fn(&OutcomeStats) -> f64| runs.iter().map(field).sum::<f64>() / count;
        Some(Self {
            power: mean(|o| o.power),
            fdr: mean(|o| o.fdr),
            selected: mean(|o| o.selected() as f64),
            true_positives: mean(|o| o.true_positives as f64),
            false_positives: mean(|o| o.false_positives as f64),
            false_negatives: mean(|o| o.false_negatives as f64),
            lambda: (!lambdas.is_empty())
                .then(|| lambdas.iter().sum::<f64>() / lambdas.len() as f64),
            runs: runs.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::score;
    use approx::assert_abs_diff_eq;
    use std::collections::BTreeSet;

    fn outcome(power: f64, fdr: f64) -> OutcomeStats {
        OutcomeStats {
            true_positives: 0,
            false_positives: 0,
            false_negatives: 0,
            power,
            fdr,
        }
    }

    #[test]
    fn averages_each_threshold_independently() {
        let targets = [0.05, 0.1, 0.2];
        let runs = [
            [outcome(0.2, 0.0), outcome(0.5, 0.1), outcome(0.9, 0.3)],
            [outcome(0.4, 0.0), outcome(0.6, 0.05), outcome(0.8, 0.2)],
            [outcome(0.0, 0.0), outcome(0.7, 0.0), outcome(1.0, 0.25)],
        ];
        let mut stats = AggregateStats::new(&targets, runs.len());
        for (sim, run) in runs.iter().enumerate() {
            stats.fold(sim, run).unwrap();
        }
        let curves = stats.finalize().unwrap();
        assert_eq!(curves.runs, 3);
        for threshold in 0..targets.len() {
            let power = runs.iter().map(|r| r[threshold].power).sum::<f64>() / 3.0;
            let fdr = runs.iter().map(|r| r[threshold].fdr).sum::<f64>() / 3.0;
            assert_abs_diff_eq!(curves.power[threshold], power, epsilon = 1e-12);
            assert_abs_diff_eq!(curves.fdr[threshold], fdr, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(curves.power[0], 0.2, epsilon = 1e-12);
        assert_abs_diff_eq!(curves.fdr[2], 0.25, epsilon = 1e-12);
    }

    #[test]
    fn finalize_is_idempotent() {
        let mut stats = AggregateStats::new(&[0.1], 1);
        stats.fold(0, &[outcome(0.5, 0.2)]).unwrap();
        assert_eq!(stats.finalize().unwrap(), stats.finalize().unwrap());
    }

    #[test]
    fn finalize_before_all_runs_is_an_error() {
        let mut stats = AggregateStats::new(&[0.1], 3);
        stats.fold(0, &[outcome(0.5, 0.2)]).unwrap();
        stats.record_skip();
        assert_eq!(
            stats.finalize(),
            Err(AggregateError::Incomplete {
                contributed: 1,
                skipped: 1,
                expected: 3
            })
        );
    }

    #[test]
    fn skipped_runs_are_left_out_of_the_mean() {
        let mut stats = AggregateStats::new(&[0.1], 3);
        stats.fold(0, &[outcome(0.4, 0.0)]).unwrap();
        stats.record_skip();
        stats.fold(2, &[outcome(0.8, 0.5)]).unwrap();
        let curves = stats.finalize().unwrap();
        assert_eq!(curves.runs, 2);
        assert_abs_diff_eq!(curves.power[0], 0.6, epsilon = 1e-12);
        assert_abs_diff_eq!(curves.fdr[0], 0.25, epsilon = 1e-12);
    }

    #[test]
    fn all_skipped_has_no_mean() {
        let mut stats = AggregateStats::new(&[0.1], 1);
        stats.record_skip();
        assert_eq!(stats.finalize(), Err(AggregateError::NoContributions));
    }

    #[test]
    fn wrong_width_is_rejected() {
        let mut stats = AggregateStats::new(&[0.1, 0.2], 1);
        let err = stats.fold(4, &[outcome(1.0, 0.0)]).unwrap_err();
        assert_eq!(
            err,
            AggregateError::Misaligned {
                sim: 4,
                expected: 2,
                found: 1
            }
        );
        assert_eq!(stats.contributed(), 0);
    }

    #[test]
    fn lasso_baseline_means() {
        let truth: BTreeSet<usize> = (0..4).collect();
        let noisy: BTreeSet<usize> = [0, 1, 9].into_iter().collect();
        let runs = [
            score(&noisy, &truth, 4),
            score(&truth, &truth, 4),
        ];
        let baseline = LassoBaseline::from_runs(&runs, &[0.2, 0.4]).unwrap();
        assert_eq!(baseline.runs, 2);
        assert_abs_diff_eq!(baseline.lambda.unwrap(), 0.3, epsilon = 1e-12);
        assert_abs_diff_eq!(baseline.power, 0.75, epsilon = 1e-12);
        assert_abs_diff_eq!(baseline.selected, 3.5, epsilon = 1e-12);
        assert_abs_diff_eq!(baseline.false_positives, 0.5, epsilon = 1e-12);
        assert!(LassoBaseline::from_runs(&runs, &[]).unwrap().lambda.is_none());
        assert!(LassoBaseline::from_runs(&[], &[]).is_none());
    }
}
