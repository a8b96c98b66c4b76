//! # Knockoff filter
//!
//! Draws a Gaussian knockoff copy of the design, fits the cross-validated lasso
//! on `[X X̃]`, and turns the coefficient pairs into feature statistics
//! `W_j = |β_j| - |β̃_j|`. For each target FDR `q` the data-dependent threshold is
//!
//! ```text
//! τ(q) = min { t ∈ {|W_j| : W_j ≠ 0} : (offset + #{j : W_j ≤ -t}) / max(1, #{j : W_j ≥ t}) ≤ q }
//! ```
//!
//! and the selection is `{ j : W_j ≥ τ(q) }` (empty when no `t` qualifies).

use super::FitError;
use super::adapter::KnockoffFilter;
use super::construction::{KnockoffMethod, KnockoffSampler, MvrOptions};
use super::covariance::ledoit_wolf_correlation;
use super::lasso::CvLasso;
use super::standardize::standardize_columns;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, concatenate};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};

/// Knockoff (offset 0) or knockoff+ (offset 1) thresholding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterOffset {
    Knockoff,
    KnockoffPlus,
}

impl FilterOffset {
    pub fn value(self) -> f64 {
        match self {
            Self::Knockoff => 0.0,
            Self::KnockoffPlus => 1.0,
        }
    }
}

/// Covariance used to build the knockoff sampler.
#[derive(Debug, Clone)]
pub enum CovarianceSource {
    /// Estimated per design by Ledoit–Wolf shrinkage of the sample correlation.
    LedoitWolf,
    /// The true correlation of the rows; the sampler is built once and reused.
    Known(Arc<Array2<f64>>),
}

/// `W_j = |β_j| - |β_{j+p}|` for coefficients fitted on `[X X̃]`.
pub fn feature_statistics(augmented_beta: ArrayView1<f64>) -> Array1<f64> {
    let p = augmented_beta.len() / 2;
    Array1::from_shape_fn(p, |j| augmented_beta[j].abs() - augmented_beta[j + p].abs())
}

/// The knockoff threshold for target `q`; `f64::INFINITY` when nothing qualifies.
pub fn knockoff_threshold(w: ArrayView1<f64>, q: f64, offset: FilterOffset) -> f64 {
    let mut candidates: Vec<f64> = w.iter().filter(|&&v| v != 0.0).map(|v| v.abs()).collect();
    candidates.sort_by(f64::total_cmp);
    candidates.dedup();

    for t in candidates {
        let negatives = w.iter().filter(|&&v| v <= -t).count() as f64;
        let positives = w.iter().filter(|&&v| v >= t).count().max(1) as f64;
        if (offset.value() + negatives) / positives <= q {
            return t;
        }
    }
    f64::INFINITY
}

/// Indices with `W_j` at or above the threshold for target `q`.
pub fn select_at(w: ArrayView1<f64>, q: f64, offset: FilterOffset) -> Vec<usize> {
    let threshold = knockoff_threshold(w, q, offset);
    w.iter()
        .enumerate()
        .filter(|&(_, &v)| v >= threshold)
        .map(|(j, _)| j)
        .collect()
}

/// Model-X Gaussian knockoffs with lasso coefficient-difference statistics.
#[derive(Debug)]
pub struct GaussianKnockoffFilter {
    method: KnockoffMethod,
    covariance: CovarianceSource,
    offset: FilterOffset,
    lasso: CvLasso,
    mvr: MvrOptions,
    cached_sampler: OnceLock<Arc<KnockoffSampler>>,
}

impl GaussianKnockoffFilter {
    pub fn new(method: KnockoffMethod, covariance: CovarianceSource, lasso: CvLasso) -> Self {
        Self {
            method,
            covariance,
            offset: FilterOffset::KnockoffPlus,
            lasso,
            mvr: MvrOptions::default(),
            cached_sampler: OnceLock::new(),
        }
    }

    pub fn with_offset(mut self, offset: FilterOffset) -> Self {
        self.offset = offset;
        self
    }

    fn known_sampler(&self, sigma: &Array2<f64>) -> Result<Arc<KnockoffSampler>, FitError> {
        if let Some(sampler) = self.cached_sampler.get() {
            return Ok(Arc::clone(sampler));
        }
        let built = Arc::new(KnockoffSampler::build(sigma, self.method, &self.mvr)?);
        Ok(Arc::clone(self.cached_sampler.get_or_init(|| built)))
    }

    /// The design the lasso sees, with its knockoff copy appended column-wise.
    fn augmented_design(
        &self,
        x: ArrayView2<f64>,
        rng: &mut StdRng,
    ) -> Result<Array2<f64>, FitError> {
        let p = x.ncols();
        match &self.covariance {
            CovarianceSource::Known(sigma) => {
                if sigma.ncols() != p {
                    return Err(FitError::CovarianceShape {
                        expected: p,
                        found: sigma.ncols(),
                    });
                }
                let sampler = self.known_sampler(sigma)?;
                let knockoffs = sampler.sample(x, rng);
                Ok(concatenate(Axis(1), &[x.view(), knockoffs.view()])?)
            }
            CovarianceSource::LedoitWolf => {
                let standardized = standardize_columns(x);
                let shrunk = ledoit_wolf_correlation(standardized.data.view());
                log::debug!("Ledoit-Wolf shrinkage intensity {:.4}", shrunk.shrinkage);
                let sampler = KnockoffSampler::build(&shrunk.matrix, self.method, &self.mvr)?;
                let knockoffs = sampler.sample(standardized.data.view(), rng);
                Ok(concatenate(
                    Axis(1),
                    &[standardized.data.view(), knockoffs.view()],
                )?)
            }
        }
    }
}

impl KnockoffFilter for GaussianKnockoffFilter {
    fn prepare(&self) -> Result<(), FitError> {
        if let CovarianceSource::Known(sigma) = &self.covariance {
            let sampler = self.known_sampler(sigma)?;
            log::info!(
                "Knockoff sampler ready ({:?}, {} variables, mean s = {:.4})",
                self.method,
                sampler.n_vars(),
                sampler.s().mean().unwrap_or(0.0)
            );
        }
        Ok(())
    }

    fn sweep(
        &self,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        fdr_targets: &[f64],
        rng: &mut StdRng,
    ) -> Result<Vec<Vec<usize>>, FitError> {
        if x.nrows() != y.len() {
            return Err(FitError::DimensionMismatch {
                rows: x.nrows(),
                responses: y.len(),
            });
        }
        let augmented = self.augmented_design(x, rng)?;
        let fit = self.lasso.fit_cv(augmented.view(), y, rng)?;
        let w = feature_statistics(fit.coefficients.view());

        Ok(fdr_targets
            .iter()
            .map(|&q| select_at(w.view(), q, self.offset))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::covariance::toeplitz_correlation;
    use ndarray::array;
    use rand::{Rng, SeedableRng};
    use rand_distr::StandardNormal;

    #[test]
    fn statistics_pair_originals_with_knockoffs() {
        let beta = array![2.0, 0.0, -1.0, 0.5, 0.0, 3.0];
        let w = feature_statistics(beta.view());
        assert_eq!(w, array![1.5, 0.0, -2.0]);
    }

    #[test]
    fn threshold_follows_the_offset() {
        // Ten clear positives and one negative.
        let mut values: Vec<f64> = (1..=10).map(|v| v as f64).collect();
        values.push(-0.5);
        let w = Array1::from(values);

        // knockoff: already at t = 0.5 the estimate is 1 / 10.
        assert_eq!(knockoff_threshold(w.view(), 0.1, FilterOffset::Knockoff), 0.5);
        // knockoff+: (1 + 1) / 10 at t = 0.5, then (1 + 0) / 10 at t = 1.
        assert_eq!(knockoff_threshold(w.view(), 0.1, FilterOffset::KnockoffPlus), 1.0);
        // A stricter target cannot be met with the +1 offset and ten positives.
        assert_eq!(
            knockoff_threshold(w.view(), 0.05, FilterOffset::KnockoffPlus),
            f64::INFINITY
        );
        assert!(select_at(w.view(), 0.05, FilterOffset::KnockoffPlus).is_empty());
        assert_eq!(
            select_at(w.view(), 0.1, FilterOffset::KnockoffPlus),
            (0..10).collect::<Vec<_>>()
        );
    }

    #[test]
    fn negatives_raise_the_threshold() {
        let w = array![5.0, 4.0, 3.0, -2.5, 2.0, 1.0, -1.0];
        // t = 1: (0 + 2) / 5 = 0.4; t = 2: (0 + 1) / 4 = 0.25; t = 2.5: 1 / 3; t = 3: 0 / 3.
        assert_eq!(knockoff_threshold(w.view(), 0.3, FilterOffset::Knockoff), 2.0);
        assert_eq!(select_at(w.view(), 0.3, FilterOffset::Knockoff), vec![0, 1, 2, 4]);
        assert_eq!(knockoff_threshold(w.view(), 0.1, FilterOffset::Knockoff), 3.0);
    }

    #[test]
    fn all_zero_statistics_select_nothing() {
        let w = Array1::<f64>::zeros(4);
        assert!(select_at(w.view(), 0.5, FilterOffset::Knockoff).is_empty());
    }

    /// Toeplitz design with `y = Xβ + ε`, `β_j = ±3` on `signals` and zero elsewhere.
    fn correlated_problem(
        n: usize,
        sigma: &Array2<f64>,
        signals: &[usize],
        seed: u64,
    ) -> (Array2<f64>, Array1<f64>) {
        use ndarray_linalg::{Cholesky, UPLO};
        let p = sigma.ncols();
        let mut rng = StdRng::seed_from_u64(seed);
        let lower = sigma.cholesky(UPLO::Lower).unwrap();
        let z = Array2::from_shape_simple_fn((n, p), || rng.sample::<f64, _>(StandardNormal));
        let x = z.dot(&lower.t());
        let mut beta = Array1::<f64>::zeros(p);
        for (i, &j) in signals.iter().enumerate() {
            beta[j] = if i % 2 == 0 { 3.0 } else { -3.0 };
        }
        let y = x.dot(&beta)
            + Array1::from_shape_simple_fn(n, || rng.sample::<f64, _>(StandardNormal));
        (x, y)
    }

    #[test]
    fn sweep_returns_one_set_per_target() {
        let p = 12;
        let sigma = Arc::new(toeplitz_correlation(p, 0.3));
        let (x, y) = correlated_problem(150, &sigma, &[0, 5], 21);
        let mut rng = StdRng::seed_from_u64(22);

        let targets = [0.05, 0.1, 0.2, 0.5];
        for covariance in [CovarianceSource::LedoitWolf, CovarianceSource::Known(Arc::clone(&sigma))] {
            let filter = GaussianKnockoffFilter::new(
                KnockoffMethod::Equi,
                covariance,
                CvLasso::with_folds(5),
            );
            filter.prepare().unwrap();
            let sets = filter.sweep(x.view(), y.view(), &targets, &mut rng).unwrap();
            assert_eq!(sets.len(), targets.len());
            for set in &sets {
                assert!(set.iter().all(|&j| j < p));
            }
            // Looser targets can only admit more variables.
            for pair in sets.windows(2) {
                assert!(pair[0].len() <= pair[1].len());
            }
        }
    }

    #[test]
    fn strong_signals_are_found_with_few_false_discoveries() {
        let p = 30;
        let signals = [0, 6, 12, 18, 24];
        let sigma = Arc::new(toeplitz_correlation(p, 0.3));

        for method in [KnockoffMethod::Equi, KnockoffMethod::Mvr] {
            let filter = GaussianKnockoffFilter::new(
                method,
                CovarianceSource::Known(Arc::clone(&sigma)),
                CvLasso::with_folds(5),
            );
            filter.prepare().unwrap();

            let seeds = 0..8u64;
            let mut fdp_sum = 0.0;
            for seed in seeds.clone() {
                let (x, y) = correlated_problem(300, &sigma, &signals, 100 + seed);
                let mut rng = StdRng::seed_from_u64(seed);
                let sets = filter.sweep(x.view(), y.view(), &[0.2], &mut rng).unwrap();
                let selected = &sets[0];
                for j in signals {
                    assert!(
                        selected.contains(&j),
                        "{method:?}, seed {seed}: signal {j} missing from {selected:?}"
                    );
                }
                let false_discoveries = selected.iter().filter(|&&j| !signals.contains(&j)).count();
                fdp_sum += false_discoveries as f64 / selected.len().max(1) as f64;
            }
            let mean_fdp = fdp_sum / seeds.count() as f64;
            assert!(mean_fdp <= 0.35, "{method:?}: mean FDP {mean_fdp}");
        }
    }

    #[test]
    fn plain_knockoff_admits_what_the_plus_offset_rejects() {
        let p = 30;
        let signals = [0, 6, 12, 18, 24];
        let sigma = Arc::new(toeplitz_correlation(p, 0.3));
        let (x, y) = correlated_problem(300, &sigma, &signals, 7);
        let targets = [0.05, 0.2];

        let sweep_with = |offset: FilterOffset| {
            GaussianKnockoffFilter::new(
                KnockoffMethod::Equi,
                CovarianceSource::Known(Arc::clone(&sigma)),
                CvLasso::with_folds(5),
            )
            .with_offset(offset)
            .sweep(x.view(), y.view(), &targets, &mut StdRng::seed_from_u64(3))
            .unwrap()
        };
        let plain = sweep_with(FilterOffset::Knockoff);
        let plus = sweep_with(FilterOffset::KnockoffPlus);

        // Same draws, same W: the plain threshold is never above the knockoff+ one.
        for (loose, strict) in plain.iter().zip(&plus) {
            assert!(strict.iter().all(|j| loose.contains(j)));
        }
        // Five signals cannot meet (1 + 0) / 5 <= 0.05, but 0 / 5 can.
        assert!(plus[0].is_empty());
        for j in signals {
            assert!(plain[0].contains(&j));
        }
    }

    #[test]
    fn known_covariance_must_match_width() {
        let filter = GaussianKnockoffFilter::new(
            KnockoffMethod::Equi,
            CovarianceSource::Known(Arc::new(Array2::eye(3))),
            CvLasso::with_folds(2),
        );
        let x = Array2::<f64>::zeros((10, 4));
        let y = Array1::<f64>::zeros(10);
        let err = filter
            .sweep(x.view(), y.view(), &[0.1], &mut StdRng::seed_from_u64(0))
            .unwrap_err();
        assert!(matches!(err, FitError::CovarianceShape { expected: 4, found: 3 }));
    }
}
