//! # Simulation configuration
//!
//! The one and only description of an experiment. It is built once at startup
//! (defaults, then a TOML file, then command-line overrides), validated, and from
//! then on only ever borrowed.

use crate::selection::construction::KnockoffMethod;
use crate::selection::knockoff::FilterOffset;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

/// FDR targets swept by the knockoff filter unless configured otherwise.
pub const DEFAULT_FDR_TARGETS: [f64; 5] = [0.01, 0.05, 0.1, 0.25, 0.5];

/// How the causal positions are placed among the `n_vars` columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SupportRule {
    /// `k` positions drawn uniformly without replacement.
    Random,
    /// Positions `0..k`.
    Leading,
}

/// Whether each simulation draws its own dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DesignRegime {
    /// A fresh design, coefficient vector and response per simulation.
    Fresh,
    /// One dataset shared by every simulation; only the selectors' own randomness varies.
    Fixed,
}

/// How many times the lasso baseline is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LassoRepeats {
    /// A single fit on the first simulation's dataset.
    Once,
    /// One fit per simulation, averaged like the knockoff curves.
    EverySimulation,
}

/// What to do when a selector fails inside one simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    Abort,
    /// Drop the simulation, count it, and average over the rest.
    Skip,
}

/// Where the knockoff construction gets its covariance from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CovarianceMode {
    /// Shrunken sample correlation of each design.
    LedoitWolf,
    /// The generator's Toeplitz correlation (model-X oracle).
    Known,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write configuration file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize configuration to TOML: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("'{0}' must be greater than zero.")]
    ZeroDimension(&'static str),
    #[error("k = {k} causal variables cannot exceed n_vars = {n_vars}.")]
    TooManyCausal { k: usize, n_vars: usize },
    #[error("At least one FDR target is required.")]
    NoFdrTargets,
    #[error("FDR target #{index} is {value}; every target must lie in (0, 1].")]
    FdrTargetOutOfRange { index: usize, value: f64 },
    #[error("The reference target {0} must lie in (0, 1].")]
    ReferenceTargetOutOfRange(f64),
    #[error("Cross-validation needs between 2 and n_samples folds, got {folds} for {n_samples} samples.")]
    InvalidFolds { folds: usize, n_samples: usize },
    #[error("'{name}' must be a positive finite number, got {value}.")]
    NonPositiveScale { name: &'static str, value: f64 },
}

/// Every knob of an experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    pub n_samples: usize,
    pub n_vars: usize,
    /// Lag-one correlation of the Toeplitz design, `corr(x_i, x_j) = rho^|i-j|`.
    pub rho: f64,
    pub k: usize,
    pub nsims: usize,
    pub seed: u64,
    pub signal_scale: f64,
    pub noise_sd: f64,
    pub support: SupportRule,
    pub design_regime: DesignRegime,
    pub lasso_repeats: LassoRepeats,
    pub cv_folds: usize,
    pub knockoff_method: KnockoffMethod,
    /// `knockoff` or `knockoff-plus` thresholding.
    pub filter_offset: FilterOffset,
    pub covariance: CovarianceMode,
    pub reference_target: f64,
    pub failure_policy: FailurePolicy,
    pub fdr_targets: Vec<f64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            n_samples: 500,
            n_vars: 1000,
            rho: 0.4,
            k: 50,
            nsims: 10,
            seed: 2022,
            signal_scale: 1.0,
            noise_sd: 1.0,
            support: SupportRule::Random,
            design_regime: DesignRegime::Fresh,
            lasso_repeats: LassoRepeats::Once,
            cv_folds: 10,
            knockoff_method: KnockoffMethod::Mvr,
            filter_offset: FilterOffset::KnockoffPlus,
            covariance: CovarianceMode::LedoitWolf,
            reference_target: 0.1,
            failure_policy: FailurePolicy::Abort,
            fdr_targets: DEFAULT_FDR_TARGETS.to_vec(),
        }
    }
}

impl SimulationConfig {
    /// Checks everything except `rho`, which the data generator owns.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_samples == 0 {
            return Err(ConfigError::ZeroDimension("n_samples"));
        }
        if self.n_vars == 0 {
            return Err(ConfigError::ZeroDimension("n_vars"));
        }
        if self.nsims == 0 {
            return Err(ConfigError::ZeroDimension("nsims"));
        }
        if self.k > self.n_vars {
            return Err(ConfigError::TooManyCausal {
                k: self.k,
                n_vars: self.n_vars,
            });
        }
        if self.fdr_targets.is_empty() {
            return Err(ConfigError::NoFdrTargets);
        }
        for (index, &value) in self.fdr_targets.iter().enumerate() {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::FdrTargetOutOfRange { index, value });
            }
        }
        if !(self.reference_target > 0.0 && self.reference_target <= 1.0) {
            return Err(ConfigError::ReferenceTargetOutOfRange(self.reference_target));
        }
        if self.cv_folds < 2 || self.cv_folds > self.n_samples {
            return Err(ConfigError::InvalidFolds {
                folds: self.cv_folds,
                n_samples: self.n_samples,
            });
        }
        for (name, value) in [("signal_scale", self.signal_scale), ("noise_sd", self.noise_sd)] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::NonPositiveScale { name, value });
            }
        }
        Ok(())
    }

    /// Saves the configuration as human-readable TOML.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Loads a configuration; fields missing from the file keep their defaults and
    /// unknown keys are an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&toml_string)?;
        Ok(config)
    }
}
