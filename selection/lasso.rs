//! # Cross-validated lasso
//!
//! Pathwise coordinate descent for
//!
//! ```text
//! minimize  (1 / 2n) ‖y - Xβ‖² + λ ‖β‖₁
//! ```
//!
//! on standardized columns, with warm starts along a log-spaced λ grid and
//! active-set iteration. K-fold cross-validation over the grid picks the λ with
//! the smallest held-out mean squared error, and the full data is refit there.

use super::FitError;
use super::adapter::{L1Selection, L1Selector};
use super::standardize::{Standardized, center, standardize_columns};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;

/// The path stops once this fraction of the null deviance is explained.
const SATURATED_DEVIANCE_RATIO: f64 = 0.999;

/// Configuration of the cross-validated lasso.
#[derive(Debug, Clone)]
pub struct CvLasso {
    pub folds: usize,
    pub n_lambda: usize,
    /// Smallest λ as a fraction of `λ_max`. Defaults to 1e-4 when `n > p`, else 1e-2.
    pub lambda_min_ratio: Option<f64>,
    /// Coordinate-descent sweeps allowed per λ.
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for CvLasso {
    fn default() -> Self {
        Self {
            folds: 10,
            n_lambda: 100,
            lambda_min_ratio: None,
            max_iterations: 10_000,
            tolerance: 1e-7,
        }
    }
}

/// The refit at the cross-validated λ.
#[derive(Debug, Clone)]
pub struct LassoFit {
    pub lambda: f64,
    /// Raw-scale slopes.
    pub coefficients: Array1<f64>,
    pub intercept: f64,
    /// Mean held-out squared error at `lambda`.
    pub cv_loss: f64,
}

impl LassoFit {
    /// Indices of the non-zero coefficients.
    pub fn support(&self) -> Vec<usize> {
        self.coefficients
            .iter()
            .enumerate()
            .filter(|&(_, &beta)| beta != 0.0)
            .map(|(j, _)| j)
            .collect()
    }
}

impl CvLasso {
    pub fn with_folds(folds: usize) -> Self {
        Self {
            folds,
            ..Self::default()
        }
    }

    /// Cross-validates the regularization strength and refits on all rows.
    pub fn fit_cv(
        &self,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        rng: &mut StdRng,
    ) -> Result<LassoFit, FitError> {
        let (n, p) = x.dim();
        if y.len() != n {
            return Err(FitError::DimensionMismatch {
                rows: n,
                responses: y.len(),
            });
        }
        if n < self.folds || self.folds < 2 {
            return Err(FitError::TooFewSamples {
                folds: self.folds,
                samples: n,
            });
        }

        let full = standardize_columns(x);
        let (y_centered, y_mean) = center(y);
        let lambda_max = lambda_max(&full.data, &y_centered);
        if !(lambda_max > 0.0) {
            // Nothing correlates with the response: the empty model is the whole path.
            return Ok(LassoFit {
                lambda: 0.0,
                coefficients: Array1::zeros(p),
                intercept: y_mean,
                cv_loss: y_centered.dot(&y_centered) / n as f64,
            });
        }
        let ratio = self
            .lambda_min_ratio
            .unwrap_or(if n > p { 1e-4 } else { 1e-2 });
        let lambdas = lambda_grid(lambda_max, ratio, self.n_lambda.max(1));

        let fold_of = assign_folds(n, self.folds, rng);
        let fold_errors = (0..self.folds)
            .into_par_iter()
            .map(|fold| self.held_out_errors(x, y, &fold_of, fold, &lambdas))
            .collect::<Vec<_>>()
            .into_iter()
            .collect::<Result<Vec<_>, FitError>>()?;

        let usable = fold_errors.iter().map(Vec::len).min().unwrap_or(0);
        let (best, cv_loss) = (0..usable)
            .map(|l| (l, fold_errors.iter().map(|errors| errors[l]).sum::<f64>() / n as f64))
            .fold((0, f64::INFINITY), |acc, candidate| {
                if candidate.1 < acc.1 { candidate } else { acc }
            });
        log::debug!(
            "CV lasso: {} of {} lambdas usable, best index {} (lambda {:.4e}, loss {:.4e})",
            usable,
            lambdas.len(),
            best,
            lambdas[best],
            cv_loss
        );

        let (lambda, beta) = refit(&full, &y_centered, &lambdas[..=best], self)?;
        let (coefficients, intercept) = full.to_raw_scale(beta.view(), y_mean);

        Ok(LassoFit {
            lambda,
            coefficients,
            intercept,
            cv_loss,
        })
    }

    /// Sum of squared held-out errors for each λ fitted on the training rows of `fold`.
    fn held_out_errors(
        &self,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        fold_of: &[usize],
        fold: usize,
        lambdas: &[f64],
    ) -> Result<Vec<f64>, FitError> {
        let (train, test): (Vec<usize>, Vec<usize>) =
            (0..fold_of.len()).partition(|&i| fold_of[i] != fold);

        let x_train = x.select(Axis(0), &train);
        let y_train = y.select(Axis(0), &train);
        let x_test = x.select(Axis(0), &test);
        let y_test = y.select(Axis(0), &test);

        let standardized = standardize_columns(x_train.view());
        let (y_centered, y_mean) = center(y_train.view());
        let path = fit_path(&standardized, &y_centered, lambdas, self)?;

        Ok(path
            .iter()
            .map(|beta| {
                let (slopes, intercept) = standardized.to_raw_scale(beta.view(), y_mean);
                let predictions = x_test.dot(&slopes);
                predictions
                    .iter()
                    .zip(y_test.iter())
                    .map(|(&prediction, &observed)| {
                        let residual = observed - prediction - intercept;
                        residual * residual
                    })
                    .sum::<f64>()
            })
            .collect())
    }
}

impl L1Selector for CvLasso {
    fn select(
        &self,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        rng: &mut StdRng,
    ) -> Result<L1Selection, FitError> {
        let fit = self.fit_cv(x, y, rng)?;
        let indices = fit.support();
        log::debug!(
            "Lasso selected {} variables at lambda {:.4e}",
            indices.len(),
            fit.lambda
        );
        Ok(L1Selection {
            indices,
            lambda: Some(fit.lambda),
        })
    }
}

/// Smallest λ for which the all-zero solution is optimal.
fn lambda_max(x: &Array2<f64>, y: &Array1<f64>) -> f64 {
    let n = x.nrows() as f64;
    x.axis_iter(Axis(1))
        .map(|column| (column.dot(y) / n).abs())
        .fold(0.0, f64::max)
}

/// `count` log-spaced values from `max` down to `max * ratio`.
pub fn lambda_grid(max: f64, ratio: f64, count: usize) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![max],
        _ => {
            let step = ratio.ln() / (count - 1) as f64;
            (0..count)
                .map(|i| max * (step * i as f64).exp())
                .collect()
        }
    }
}

fn assign_folds(n: usize, folds: usize, rng: &mut StdRng) -> Vec<usize> {
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(rng);
    let mut fold_of = vec![0; n];
    for (position, &row) in order.iter().enumerate() {
        fold_of[row] = position % folds;
    }
    fold_of
}

fn soft_threshold(value: f64, threshold: f64) -> f64 {
    if value > threshold {
        value - threshold
    } else if value < -threshold {
        value + threshold
    } else {
        0.0
    }
}

/// Coefficients (standardized scale) at each λ, warm-started from the previous one.
/// Stops early once the fit saturates, so the result may be shorter than `lambdas`.
fn fit_path(
    standardized: &Standardized,
    y: &Array1<f64>,
    lambdas: &[f64],
    settings: &CvLasso,
) -> Result<Vec<Array1<f64>>, FitError> {
    let x = &standardized.data;
    let p = x.ncols();
    let columns = standardized.usable_columns();
    let null_deviance = y.dot(y);

    let mut beta = Array1::<f64>::zeros(p);
    let mut residual = y.clone();
    let mut path = Vec::with_capacity(lambdas.len());

    for &lambda in lambdas {
        coordinate_descent(x, &columns, &mut beta, &mut residual, lambda, settings)?;
        path.push(beta.clone());

        if null_deviance > 0.0 {
            let explained = 1.0 - residual.dot(&residual) / null_deviance;
            if explained >= SATURATED_DEVIANCE_RATIO {
                log::debug!("Lasso path saturated at lambda {lambda:.4e}");
                break;
            }
        }
    }
    Ok(path)
}

/// Fits the full data down the grid and returns the last λ the path reached with
/// its coefficients. A saturated path stops short of `lambdas.last()`.
fn refit(
    standardized: &Standardized,
    y: &Array1<f64>,
    lambdas: &[f64],
    settings: &CvLasso,
) -> Result<(f64, Array1<f64>), FitError> {
    let mut path = fit_path(standardized, y, lambdas, settings)?;
    let lambda = path.len().checked_sub(1).map_or(0.0, |last| lambdas[last]);
    let beta = path
        .pop()
        .unwrap_or_else(|| Array1::zeros(standardized.data.ncols()));
    Ok((lambda, beta))
}

/// One coordinate update; returns the absolute change of `beta[j]`.
fn update_coordinate(
    x: &Array2<f64>,
    j: usize,
    beta: &mut Array1<f64>,
    residual: &mut Array1<f64>,
    lambda: f64,
) -> f64 {
    let column = x.column(j);
    let n = x.nrows() as f64;
    let previous = beta[j];
    let updated = soft_threshold(column.dot(residual) / n + previous, lambda);
    let delta = updated - previous;
    if delta != 0.0 {
        residual.scaled_add(-delta, &column);
        beta[j] = updated;
    }
    delta.abs()
}

/// Full sweeps alternate with sweeps over the current non-zero set until a full
/// sweep leaves every coefficient (almost) where it was.
fn coordinate_descent(
    x: &Array2<f64>,
    columns: &[usize],
    beta: &mut Array1<f64>,
    residual: &mut Array1<f64>,
    lambda: f64,
    settings: &CvLasso,
) -> Result<(), FitError> {
    let mut sweeps = 0;
    loop {
        let mut largest = 0.0f64;
        for &j in columns {
            largest = largest.max(update_coordinate(x, j, beta, residual, lambda));
        }
        sweeps += 1;
        if largest < settings.tolerance {
            return Ok(());
        }

        let active: Vec<usize> = columns.iter().copied().filter(|&j| beta[j] != 0.0).collect();
        loop {
            if sweeps >= settings.max_iterations {
                return Err(FitError::DidNotConverge {
                    lambda,
                    max_iterations: settings.max_iterations,
                });
            }
            let mut active_largest = 0.0f64;
            for &j in &active {
                active_largest = active_largest.max(update_coordinate(x, j, beta, residual, lambda));
            }
            sweeps += 1;
            if active_largest < settings.tolerance {
                break;
            }
        }

        if sweeps >= settings.max_iterations {
            return Err(FitError::DidNotConverge {
                lambda,
                max_iterations: settings.max_iterations,
            });
        }
    }
}
