//! Knockoff-versus-lasso verdicts at a reference FDR target.

use crate::aggregate::{KnockoffCurves, LassoBaseline};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of the target closest to `nominal`; ties go to the earlier entry.
pub fn nearest_target_index(fdr_targets: &[f64], nominal: f64) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (index, &target) in fdr_targets.iter().enumerate() {
        let distance = (target - nominal).abs();
        if best.is_none_or(|(_, closest)| distance < closest) {
            best = Some((index, distance));
        }
    }
    best.map(|(index, _)| index)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "kebab-case")]
pub enum PowerVerdict {
    /// Relative improvement `(knockoff - lasso) / lasso` in percent.
    KnockoffHigher { improvement_pct: f64 },
    LassoHigherOrEqual,
    /// The lasso found nothing, so no relative improvement exists.
    Undefined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FdrVerdict {
    Controlled,
    Exceeded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub nominal_target: f64,
    pub reference_index: usize,
    pub reference_target: f64,
    pub knockoff_power: f64,
    pub knockoff_fdr: f64,
    pub lasso_power: f64,
    pub lasso_fdr: f64,
    pub fdr: FdrVerdict,
    pub power: PowerVerdict,
}

/// Compares the knockoff curves at the target nearest `nominal` with the lasso.
///
/// `None` when the curves are empty.
pub fn compare(
    curves: &KnockoffCurves,
    lasso: &LassoBaseline,
    nominal: f64,
) -> Option<ComparisonReport> {
    let reference_index = nearest_target_index(&curves.fdr_targets, nominal)?;
    let knockoff_power = curves.power[reference_index];
    let knockoff_fdr = curves.fdr[reference_index];

    let power = if lasso.power == 0.0 {
        PowerVerdict::Undefined
    } else if knockoff_power > lasso.power {
        PowerVerdict::KnockoffHigher {
            improvement_pct: (knockoff_power - lasso.power) / lasso.power * 100.0,
        }
    } else {
        PowerVerdict::LassoHigherOrEqual
    };
    let fdr = if knockoff_fdr <= nominal {
        FdrVerdict::Controlled
    } else {
        FdrVerdict::Exceeded
    };

    Some(ComparisonReport {
        nominal_target: nominal,
        reference_index,
        reference_target: curves.fdr_targets[reference_index],
        knockoff_power,
        knockoff_fdr,
        lasso_power: lasso.power,
        lasso_fdr: lasso.fdr,
        fdr,
        power,
    })
}

impl fmt::Display for PowerVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KnockoffHigher { improvement_pct } => write!(
                f,
                "knockoffs have higher power ({improvement_pct:.1}% relative improvement)"
            ),
            Self::LassoHigherOrEqual => f.write_str("the lasso has equal or higher power"),
            Self::Undefined => f.write_str("undefined (the lasso has zero power)"),
        }
    }
}

impl fmt::Display for FdrVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Controlled => "controlled",
            Self::Exceeded => "exceeded",
        })
    }
}

impl fmt::Display for ComparisonReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "At FDR target {:.2}: knockoff power {:.3} vs lasso power {:.3}; {}",
            self.reference_target, self.knockoff_power, self.lasso_power, self.power
        )?;
        write!(
            f,
            "Knockoff FDR {:.3} vs nominal {:.2}: {}",
            self.knockoff_fdr, self.nominal_target, self.fdr
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn curves(power: f64, fdr: f64) -> KnockoffCurves {
        KnockoffCurves {
            fdr_targets: vec![0.05, 0.1, 0.2],
            power: vec![0.0, power, 1.0],
            fdr: vec![0.0, fdr, 0.5],
            selected: vec![0.0, 10.0, 20.0],
            runs: 1,
        }
    }

    fn lasso(power: f64) -> LassoBaseline {
        LassoBaseline {
            power,
            fdr: 0.4,
            selected: 30.0,
            true_positives: 18.0,
            false_positives: 12.0,
            false_negatives: 32.0,
            lambda: Some(0.05),
            runs: 1,
        }
    }

    #[test]
    fn nearest_target_prefers_the_earlier_tie() {
        assert_eq!(nearest_target_index(&[0.25, 0.75], 0.5), Some(0));
        assert_eq!(nearest_target_index(&[0.01, 0.05, 0.1, 0.25], 0.1), Some(2));
        assert_eq!(nearest_target_index(&[0.5], 0.1), Some(0));
        assert_eq!(nearest_target_index(&[], 0.1), None);
    }

    #[test]
    fn knockoff_improvement_is_relative() {
        let report = compare(&curves(0.6, 0.08), &lasso(0.4), 0.1).unwrap();
        assert_eq!(report.reference_index, 1);
        match report.power {
            PowerVerdict::KnockoffHigher { improvement_pct } => {
                assert_abs_diff_eq!(improvement_pct, 50.0, epsilon = 1e-9);
            }
            other => panic!("unexpected verdict {other:?}"),
        }
        assert_eq!(report.fdr, FdrVerdict::Controlled);
    }

    #[test]
    fn equal_power_favours_the_lasso() {
        let report = compare(&curves(0.4, 0.2), &lasso(0.4), 0.1).unwrap();
        assert_eq!(report.power, PowerVerdict::LassoHigherOrEqual);
        assert_eq!(report.fdr, FdrVerdict::Exceeded);
    }

    #[test]
    fn zero_lasso_power_is_undefined() {
        let report = compare(&curves(0.3, 0.1), &lasso(0.0), 0.1).unwrap();
        assert_eq!(report.power, PowerVerdict::Undefined);
        // FDR exactly at the nominal level still counts as controlled.
        assert_eq!(report.fdr, FdrVerdict::Controlled);
    }
}
