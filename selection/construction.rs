//! # Gaussian knockoff construction
//!
//! For a design whose rows are `N(0, Σ)` with `Σ` a correlation matrix, a valid
//! knockoff copy is drawn from
//!
//! ```text
//! X̃ | X ~ N( X (I - Σ⁻¹ D),  2D - D Σ⁻¹ D ),    D = diag(s)
//! ```
//!
//! for any `s` with `0 ≤ D ≤ 2Σ`. The choice of `s` decides how distinguishable
//! each knockoff is from its original:
//!
//! - `Equi`: every `s_j = min(1, 2 λ_min(Σ))`.
//! - `Mvr`: minimizes the variance-based reconstructability
//!   `Σ_j 1/s_j + tr((2Σ - D)⁻¹)` by coordinate descent. Each coordinate has
//!   the closed-form optimum `δ = (1 - √c s_j) / (d + √c)`, with
//!   `M = (2Σ - D)⁻¹`, `d = M_jj`, `c = ‖M e_j‖²`, and `M` is refreshed by a
//!   Sherman–Morrison rank-one update instead of a fresh inverse.

use super::FitError;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use ndarray_linalg::{EigValsh, Eigh, Inverse, UPLO};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

/// Lower bound kept on every `s_j` so the objective and the sampler stay finite.
const MIN_S: f64 = 1e-5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KnockoffMethod {
    Equi,
    Mvr,
}

/// Settings for the MVR coordinate descent.
#[derive(Debug, Clone, Copy)]
pub struct MvrOptions {
    pub max_sweeps: usize,
    /// Stop once no coordinate moves by more than this in a full sweep.
    pub tolerance: f64,
}

impl Default for MvrOptions {
    fn default() -> Self {
        Self {
            max_sweeps: 10,
            tolerance: 1e-6,
        }
    }
}

fn min_eigenvalue(sigma: &Array2<f64>) -> Result<f64, FitError> {
    let eigenvalues = sigma.eigvalsh(UPLO::Lower)?;
    Ok(eigenvalues.iter().copied().fold(f64::INFINITY, f64::min))
}

fn positive_min_eigenvalue(sigma: &Array2<f64>) -> Result<f64, FitError> {
    let min_eigenvalue = min_eigenvalue(sigma)?;
    if min_eigenvalue <= 0.0 || !min_eigenvalue.is_finite() {
        return Err(FitError::NotPositiveDefinite { min_eigenvalue });
    }
    Ok(min_eigenvalue)
}

/// Equicorrelated `s`.
pub fn equi_s(sigma: &Array2<f64>) -> Result<Array1<f64>, FitError> {
    let lambda_min = positive_min_eigenvalue(sigma)?;
    let value = (2.0 * lambda_min).min(1.0);
    Ok(Array1::from_elem(sigma.nrows(), value))
}

/// Minimum variance-based reconstructability `s`.
pub fn mvr_s(sigma: &Array2<f64>, options: &MvrOptions) -> Result<Array1<f64>, FitError> {
    let p = sigma.nrows();
    let lambda_min = positive_min_eigenvalue(sigma)?;

    // Half the equicorrelated value keeps 2Σ - D comfortably positive definite.
    let start = (2.0 * lambda_min).min(1.0) * 0.5;
    let mut s = Array1::from_elem(p, start);
    let mut slack = sigma * 2.0;
    for j in 0..p {
        slack[[j, j]] -= start;
    }
    let mut inverse = slack.inv()?;

    for sweep in 0..options.max_sweeps {
        let mut largest_move: f64 = 0.0;
        for j in 0..p {
            let column = inverse.column(j).to_owned();
            let c = column.dot(&column);
            let d = column[j];
            let root = c.sqrt();

            let step = (1.0 - root * s[j]) / (d + root);
            let updated = (s[j] + step).clamp(MIN_S, 1.0);
            let delta = updated - s[j];
            let denominator = 1.0 - delta * d;
            if delta == 0.0 || denominator <= 0.0 {
                continue;
            }

            // (2Σ - D - δ e_j e_jᵀ)⁻¹ = M + δ M e_j e_jᵀ M / (1 - δ M_jj)
            let scale = delta / denominator;
            for (row_index, mut row) in inverse.axis_iter_mut(Axis(0)).enumerate() {
                row.scaled_add(scale * column[row_index], &column);
            }
            s[j] = updated;
            largest_move = largest_move.max(delta.abs());
        }
        log::debug!("MVR sweep {}: largest coordinate move {:.3e}", sweep + 1, largest_move);
        if largest_move < options.tolerance {
            break;
        }
    }

    Ok(s)
}

/// The MVR objective `Σ 1/s_j + tr((2Σ - D)⁻¹)`.
pub fn mvr_loss(sigma: &Array2<f64>, s: &Array1<f64>) -> Result<f64, FitError> {
    let mut slack = sigma * 2.0;
    for (j, &value) in s.iter().enumerate() {
        slack[[j, j]] -= value;
    }
    let inverse = slack.inv()?;
    Ok(s.iter().map(|&v| 1.0 / v).sum::<f64>() + inverse.diag().sum())
}

/// Everything needed to draw knockoffs for one covariance, precomputed.
#[derive(Debug, Clone)]
pub struct KnockoffSampler {
    /// `I - Σ⁻¹ D`, applied on the right of the design.
    mean_transform: Array2<f64>,
    /// `Cᵀ` with `C Cᵀ = 2D - D Σ⁻¹ D`.
    noise_factor: Array2<f64>,
    s: Array1<f64>,
}

impl KnockoffSampler {
    pub fn build(
        sigma: &Array2<f64>,
        method: KnockoffMethod,
        mvr: &MvrOptions,
    ) -> Result<Self, FitError> {
        let s = match method {
            KnockoffMethod::Equi => equi_s(sigma)?,
            KnockoffMethod::Mvr => mvr_s(sigma, mvr)?,
        };
        Self::from_s(sigma, s)
    }

    pub fn from_s(sigma: &Array2<f64>, s: Array1<f64>) -> Result<Self, FitError> {
        let p = sigma.nrows();
        let sigma_inv = sigma.inv()?;

        let mut mean_transform = Array2::<f64>::eye(p);
        for i in 0..p {
            for j in 0..p {
                mean_transform[[i, j]] -= sigma_inv[[i, j]] * s[j];
            }
        }

        let conditional = Array2::from_shape_fn((p, p), |(i, j)| {
            let shared = -s[i] * sigma_inv[[i, j]] * s[j];
            if i == j { shared + 2.0 * s[i] } else { shared }
        });
        let (eigenvalues, eigenvectors) = conditional.eigh(UPLO::Lower)?;
        // Rounding can leave tiny negative eigenvalues on the boundary of the feasible set.
        let mut factor = eigenvectors;
        for (mut column, &value) in factor.axis_iter_mut(Axis(1)).zip(eigenvalues.iter()) {
            column *= value.max(0.0).sqrt();
        }

        Ok(Self {
            mean_transform,
            noise_factor: factor.t().to_owned(),
            s,
        })
    }

    pub fn s(&self) -> &Array1<f64> {
        &self.s
    }

    pub fn n_vars(&self) -> usize {
        self.s.len()
    }

    /// Draws one knockoff copy of `x` (rows are samples).
    pub fn sample<R: Rng>(&self, x: ArrayView2<f64>, rng: &mut R) -> Array2<f64> {
        let noise = Array2::from_shape_simple_fn(x.dim(), || rng.sample::<f64, _>(StandardNormal));
        x.dot(&self.mean_transform) + noise.dot(&self.noise_factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::covariance::toeplitz_correlation;
    use approx::assert_abs_diff_eq;
    use ndarray_linalg::Cholesky;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn is_positive_definite(matrix: &Array2<f64>) -> bool {
        matrix.cholesky(UPLO::Lower).is_ok()
    }

    #[test]
    fn identity_covariance_gives_unit_s() {
        let sigma = Array2::<f64>::eye(6);
        let equi = equi_s(&sigma).unwrap();
        assert!(equi.iter().all(|&v| (v - 1.0).abs() < 1e-12));

        let mvr = mvr_s(&sigma, &MvrOptions::default()).unwrap();
        for &value in mvr.iter() {
            assert_abs_diff_eq!(value, 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn mvr_stays_feasible_and_beats_equi() {
        let sigma = toeplitz_correlation(8, 0.6);
        let mvr = mvr_s(
            &sigma,
            &MvrOptions {
                max_sweeps: 50,
                tolerance: 1e-9,
            },
        )
        .unwrap();
        assert!(mvr.iter().all(|&v| v > 0.0 && v <= 1.0));

        let mut slack = &sigma * 2.0;
        for j in 0..8 {
            slack[[j, j]] -= mvr[j];
        }
        assert!(is_positive_definite(&slack));

        // Equi sits on the boundary of the feasible set, so compare against a point just inside it.
        let equi = equi_s(&sigma).unwrap() * 0.999;
        let mvr_value = mvr_loss(&sigma, &mvr).unwrap();
        let equi_value = mvr_loss(&sigma, &equi).unwrap();
        assert!(mvr_value <= equi_value, "mvr {mvr_value} vs equi {equi_value}");
    }

    #[test]
    fn singular_covariance_is_rejected() {
        let sigma = Array2::from_elem((3, 3), 1.0);
        assert!(matches!(
            equi_s(&sigma),
            Err(FitError::NotPositiveDefinite { .. })
        ));
    }

    #[test]
    fn knockoffs_reproduce_the_joint_covariance() {
        let p = 3;
        let sigma = toeplitz_correlation(p, 0.5);
        let sampler = KnockoffSampler::build(&sigma, KnockoffMethod::Equi, &MvrOptions::default())
            .unwrap();
        assert_eq!(sampler.n_vars(), p);

        let mut rng = StdRng::seed_from_u64(11);
        let n = 40_000;
        let lower = sigma.cholesky(UPLO::Lower).unwrap();
        let z = Array2::from_shape_simple_fn((n, p), || rng.sample::<f64, _>(StandardNormal));
        let x = z.dot(&lower.t());
        let knockoffs = sampler.sample(x.view(), &mut rng);

        let n_f = n as f64;
        let s = sampler.s();
        for i in 0..p {
            for j in 0..p {
                // cov(x̃_i, x̃_j) = Σ_ij and cov(x_i, x̃_j) = Σ_ij - s_j δ_ij
                let knockoff_cov = knockoffs.column(i).dot(&knockoffs.column(j)) / n_f;
                assert_abs_diff_eq!(knockoff_cov, sigma[[i, j]], epsilon = 0.03);
                let cross_cov = x.column(i).dot(&knockoffs.column(j)) / n_f;
                let expected = if i == j { sigma[[i, j]] - s[j] } else { sigma[[i, j]] };
                assert_abs_diff_eq!(cross_cov, expected, epsilon = 0.03);
            }
        }
    }
}
