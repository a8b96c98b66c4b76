//! The seam between the harness and the selectors.
//!
//! Both selectors are normalized to sets of column indices here and their output
//! is checked before anything downstream scores it: every index must address a
//! column of the design, and a threshold sweep must produce exactly one set per
//! FDR target.

use super::FitError;
use crate::types::{AlignmentError, KnockoffSelection, SelectedSet};
use ndarray::{ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use thiserror::Error;

/// Columns picked by an L1 selector, with the penalty they were picked at when
/// the selector tunes one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct L1Selection {
    pub indices: Vec<usize>,
    pub lambda: Option<f64>,
}

impl From<Vec<usize>> for L1Selection {
    fn from(indices: Vec<usize>) -> Self {
        Self {
            indices,
            lambda: None,
        }
    }
}

/// A single-set L1 selector, e.g. the cross-validated lasso.
pub trait L1Selector: Sync {
    /// The selected columns of `x`. Must be deterministic for a fixed `rng` state.
    fn select(
        &self,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        rng: &mut StdRng,
    ) -> Result<L1Selection, FitError>;
}

/// A selector that sweeps a list of target FDR levels in one call.
pub trait KnockoffFilter: Sync {
    /// One-time work shared by every call, run before the simulations start.
    fn prepare(&self) -> Result<(), FitError> {
        Ok(())
    }

    /// One selected set per entry of `fdr_targets`, in the same order.
    fn sweep(
        &self,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        fdr_targets: &[f64],
        rng: &mut StdRng,
    ) -> Result<Vec<Vec<usize>>, FitError>;
}

#[derive(Error, Debug)]
pub enum SelectionError {
    #[error(transparent)]
    Fit(#[from] FitError),
    #[error(transparent)]
    Alignment(#[from] AlignmentError),
}

fn checked_set(
    indices: Vec<usize>,
    n_vars: usize,
    threshold_index: Option<usize>,
) -> Result<SelectedSet, FitError> {
    if let Some(&index) = indices.iter().find(|&&j| j >= n_vars) {
        return Err(FitError::IndexOutOfRange {
            index,
            n_vars,
            threshold_index,
        });
    }
    Ok(indices.into_iter().collect())
}

/// Puts an L1 selector and a knockoff filter behind one validated interface.
#[derive(Debug)]
pub struct SelectionAdapter<L, K> {
    lasso: L,
    knockoff: K,
}

impl<L: L1Selector, K: KnockoffFilter> SelectionAdapter<L, K> {
    pub fn new(lasso: L, knockoff: K) -> Self {
        Self { lasso, knockoff }
    }

    pub fn prepare(&self) -> Result<(), FitError> {
        self.knockoff.prepare()
    }

    /// The lasso's set and, if reported, the penalty it was selected at.
    pub fn select_lasso(
        &self,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        rng: &mut StdRng,
    ) -> Result<(SelectedSet, Option<f64>), FitError> {
        let selection = self.lasso.select(x, y, rng)?;
        let set = checked_set(selection.indices, x.ncols(), None)?;
        Ok((set, selection.lambda))
    }

    pub fn select_knockoff(
        &self,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        fdr_targets: &[f64],
        rng: &mut StdRng,
    ) -> Result<KnockoffSelection, SelectionError> {
        let raw = self.knockoff.sweep(x, y, fdr_targets, rng)?;
        if raw.len() != fdr_targets.len() {
            return Err(AlignmentError {
                expected: fdr_targets.len(),
                found: raw.len(),
            }
            .into());
        }
        let sets = raw
            .into_iter()
            .enumerate()
            .map(|(threshold_index, indices)| {
                checked_set(indices, x.ncols(), Some(threshold_index))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(KnockoffSelection::zip(fdr_targets, sets)?)
    }
}
