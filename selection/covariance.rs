//! Correlation structures shared by the data generator and the knockoff construction.

use ndarray::{Array2, ArrayView2, Axis};

/// The AR(1)-type Toeplitz correlation `Σ_ij = rho^|i-j|`.
pub fn toeplitz_correlation(n_vars: usize, rho: f64) -> Array2<f64> {
    // i32 exponents cover any realistic width; beyond that the entries underflow anyway.
    Array2::from_shape_fn((n_vars, n_vars), |(i, j)| {
        let lag = i.abs_diff(j).min(i32::MAX as usize) as i32;
        rho.powi(lag)
    })
}

/// A sample correlation shrunk towards the identity.
#[derive(Debug, Clone)]
pub struct ShrunkCorrelation {
    pub matrix: Array2<f64>,
    /// Weight on the identity target, in [0, 1].
    pub shrinkage: f64,
}

/// Ledoit–Wolf shrinkage of the sample correlation of a standardized design.
///
/// `z` must have centered, unit-variance columns (constant columns may be all zero).
/// The estimate is `δ I + (1 - δ) S` with `S = zᵀz / n` and the Ledoit–Wolf
/// intensity `δ = min(b̄², d²) / d²`, where `d² = ‖S - I‖²` and
/// `b̄² = n⁻² Σ_i ‖z_i z_iᵀ - S‖²` (Frobenius norms scaled by `1/p`). The
/// diagonal is pinned to 1 so the result is a correlation matrix.
pub fn ledoit_wolf_correlation(z: ArrayView2<f64>) -> ShrunkCorrelation {
    let (n, p) = z.dim();
    if n == 0 || p == 0 {
        return ShrunkCorrelation {
            matrix: Array2::eye(p),
            shrinkage: 1.0,
        };
    }
    let n_f = n as f64;
    let p_f = p as f64;

    let sample = z.t().dot(&z) / n_f;

    let sample_sq_norm: f64 = sample.iter().map(|&v| v * v).sum();
    let distance_sq = sample
        .indexed_iter()
        .map(|((i, j), &v)| {
            let target = if i == j { 1.0 } else { 0.0 };
            (v - target) * (v - target)
        })
        .sum::<f64>()
        / p_f;

    // Σ_i ‖z_i z_iᵀ - S‖² = Σ_i ‖z_i‖⁴ - n ‖S‖², because Σ_i z_i z_iᵀ = n S.
    let fourth_moment: f64 = z
        .axis_iter(Axis(0))
        .map(|row| {
            let sq = row.dot(&row);
            sq * sq
        })
        .sum();
    let spread_sq = ((fourth_moment - n_f * sample_sq_norm) / (n_f * n_f * p_f)).max(0.0);

    let shrinkage = if distance_sq > 0.0 {
        (spread_sq.min(distance_sq) / distance_sq).clamp(0.0, 1.0)
    } else {
        1.0
    };

    let mut matrix = sample * (1.0 - shrinkage);
    for j in 0..p {
        matrix[[j, j]] = 1.0;
    }

    ShrunkCorrelation { matrix, shrinkage }
}
