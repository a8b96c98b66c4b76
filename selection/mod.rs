//! Variable selectors and the adapter that puts them behind one interface.
//!
//! The harness only ever talks to [`adapter::SelectionAdapter`]. The selectors
//! themselves implement [`adapter::L1Selector`] and [`adapter::KnockoffFilter`],
//! so any other solver with the same contract can be swapped in.

use ndarray_linalg::error::LinalgError;
use thiserror::Error;

pub mod adapter;
pub mod construction;
pub mod covariance;
pub mod knockoff;
pub mod lasso;
pub mod standardize;

pub use adapter::{KnockoffFilter, L1Selection, L1Selector, SelectionAdapter, SelectionError};
pub use construction::KnockoffMethod;
pub use knockoff::{CovarianceSource, FilterOffset, GaussianKnockoffFilter};
pub use lasso::{CvLasso, LassoFit};

/// Failures of a selector on one dataset.
#[derive(Error, Debug)]
pub enum FitError {
    #[error(
        "Coordinate descent did not converge within {max_iterations} sweeps at lambda = {lambda:.6e}."
    )]
    DidNotConverge { lambda: f64, max_iterations: usize },

    #[error("The design has {rows} rows but the response has {responses} entries.")]
    DimensionMismatch { rows: usize, responses: usize },

    #[error("Cross-validation with {folds} folds needs at least {folds} samples, found {samples}.")]
    TooFewSamples { folds: usize, samples: usize },

    #[error(
        "The covariance has {found} columns but the design has {expected}; a known covariance must match the design width."
    )]
    CovarianceShape { expected: usize, found: usize },

    #[error(
        "The covariance is not positive definite (smallest eigenvalue {min_eigenvalue:.3e}); knockoffs cannot be constructed."
    )]
    NotPositiveDefinite { min_eigenvalue: f64 },

    #[error(
        "Selector returned variable index {index}, but the design only has {n_vars} columns{}.",
        .threshold_index.map(|j| format!(" (FDR target #{j})")).unwrap_or_default()
    )]
    IndexOutOfRange {
        index: usize,
        n_vars: usize,
        threshold_index: Option<usize>,
    },

    #[error("Linear algebra failure: {0}")]
    Linalg(#[from] LinalgError),

    #[error("Failed to assemble the augmented design: {0}")]
    Shape(#[from] ndarray::ShapeError),
}
