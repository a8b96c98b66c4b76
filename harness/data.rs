//! Synthetic regression data with a Toeplitz-correlated design.

use crate::config::{SimulationConfig, SupportRule};
use crate::selection::covariance::toeplitz_correlation;
use crate::types::TrueSupport;
use ndarray::{Array1, Array2};
use ndarray_linalg::error::LinalgError;
use ndarray_linalg::{Cholesky, UPLO};
use rand::rngs::StdRng;
use rand::Rng;
use rand::seq::index;
use rand_distr::StandardNormal;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataGenerationError {
    #[error("rho = {0} is outside [0, 1); the Toeplitz correlation would not be positive definite.")]
    InvalidRho(f64),
    #[error("Cholesky factorization of the {n_vars}x{n_vars} correlation failed: {source}")]
    Factorization {
        n_vars: usize,
        #[source]
        source: LinalgError,
    },
}

/// One simulated dataset. Owned by a single simulation and never mutated.
#[derive(Debug, Clone)]
pub struct SyntheticDataset {
    /// `n_samples x n_vars`, rows i.i.d. `N(0, Σ)`.
    pub design: Array2<f64>,
    pub response: Array1<f64>,
    /// Non-zero exactly on `true_support`.
    pub coefficients: Array1<f64>,
    pub true_support: TrueSupport,
}

/// Draws datasets for one configuration.
///
/// The correlation and its lower Cholesky factor are computed once here and
/// shared read-only by every draw.
#[derive(Debug, Clone)]
pub struct DataGenerator {
    n_samples: usize,
    k: usize,
    signal_scale: f64,
    noise_sd: f64,
    support: SupportRule,
    correlation: Arc<Array2<f64>>,
    lower: Arc<Array2<f64>>,
}

impl DataGenerator {
    pub fn new(config: &SimulationConfig) -> Result<Self, DataGenerationError> {
        if !(0.0..1.0).contains(&config.rho) {
            return Err(DataGenerationError::InvalidRho(config.rho));
        }
        let correlation = toeplitz_correlation(config.n_vars, config.rho);
        let lower = correlation
            .cholesky(UPLO::Lower)
            .map_err(|source| DataGenerationError::Factorization {
                n_vars: config.n_vars,
                source,
            })?;
        log::debug!(
            "Factored {}x{} Toeplitz correlation (rho = {})",
            config.n_vars,
            config.n_vars,
            config.rho
        );

        Ok(Self {
            n_samples: config.n_samples,
            k: config.k,
            signal_scale: config.signal_scale,
            noise_sd: config.noise_sd,
            support: config.support,
            correlation: Arc::new(correlation),
            lower: Arc::new(lower),
        })
    }

    /// The population correlation of the design rows.
    pub fn correlation(&self) -> Arc<Array2<f64>> {
        Arc::clone(&self.correlation)
    }

    pub fn n_vars(&self) -> usize {
        self.lower.nrows()
    }

    pub fn generate(&self, rng: &mut StdRng) -> SyntheticDataset {
        let n_vars = self.n_vars();

        let z = Array2::from_shape_simple_fn((self.n_samples, n_vars), || {
            rng.sample::<f64, _>(StandardNormal)
        });
        let design = z.dot(&self.lower.t());

        let true_support: TrueSupport = match self.support {
            SupportRule::Random => index::sample(rng, n_vars, self.k).into_iter().collect(),
            SupportRule::Leading => (0..self.k).collect(),
        };

        let mut coefficients = Array1::<f64>::zeros(n_vars);
        for &j in true_support.iter() {
            let mut value = 0.0;
            while value == 0.0 {
                value = rng.sample::<f64, _>(StandardNormal) * self.signal_scale;
            }
            coefficients[j] = value;
        }

        let noise = Array1::from_shape_simple_fn(self.n_samples, || {
            rng.sample::<f64, _>(StandardNormal) * self.noise_sd
        });
        let response = design.dot(&coefficients) + noise;

        SyntheticDataset {
            design,
            response,
            coefficients,
            true_support,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn small_config() -> SimulationConfig {
        SimulationConfig {
            n_samples: 4000,
            n_vars: 6,
            rho: 0.5,
            k: 3,
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn support_has_exactly_k_positions() {
        let generator = DataGenerator::new(&small_config()).unwrap();
        let data = generator.generate(&mut StdRng::seed_from_u64(1));
        assert_eq!(data.true_support.k(), 3);
        assert!(data.true_support.iter().all(|&j| j < 6));
        for j in 0..6 {
            assert_eq!(data.coefficients[j] != 0.0, data.true_support.contains(&j));
        }
        assert_eq!(data.design.dim(), (4000, 6));
        assert_eq!(data.response.len(), 4000);
    }

    #[test]
    fn leading_support_is_the_first_k_columns() {
        let config = SimulationConfig {
            support: SupportRule::Leading,
            ..small_config()
        };
        let data = DataGenerator::new(&config)
            .unwrap()
            .generate(&mut StdRng::seed_from_u64(2));
        assert_eq!(data.true_support.iter().copied().collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn rho_outside_unit_interval_is_rejected() {
        for rho in [-0.1, 1.0, f64::NAN] {
            let config = SimulationConfig { rho, ..small_config() };
            assert!(matches!(
                DataGenerator::new(&config),
                Err(DataGenerationError::InvalidRho(_))
            ));
        }
    }

    #[test]
    fn neighbouring_columns_have_correlation_rho() {
        let generator = DataGenerator::new(&small_config()).unwrap();
        let data = generator.generate(&mut StdRng::seed_from_u64(3));
        let n = data.design.nrows() as f64;
        let a = data.design.column(1);
        let b = data.design.column(2);
        let c = data.design.column(3);
        // Population means are zero and variances one, so raw moments suffice.
        let lag_one = a.dot(&b) / n;
        let lag_two = a.dot(&c) / n;
        assert!((lag_one - 0.5).abs() < 0.06, "lag one {lag_one}");
        assert!((lag_two - 0.25).abs() < 0.06, "lag two {lag_two}");
    }

    #[test]
    fn same_seed_same_dataset() {
        let generator = DataGenerator::new(&small_config()).unwrap();
        let first = generator.generate(&mut StdRng::seed_from_u64(9));
        let second = generator.generate(&mut StdRng::seed_from_u64(9));
        assert_eq!(first.design, second.design);
        assert_eq!(first.true_support, second.true_support);
    }
}
