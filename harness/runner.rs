//! # Monte Carlo driver
//!
//! Every simulation is an independent task: it owns an RNG stream derived from
//! the base seed and its index, draws (or borrows) a dataset, runs both
//! selectors and scores each knockoff threshold. The lasso draws from a second
//! stream of its own, so how often it runs never shifts the knockoff draws.
//! Tasks run as a rayon map and return immutable records; a single sequential
//! pass then folds them into the aggregate in simulation order, so results do
//! not depend on scheduling.

use crate::aggregate::{AggregateError, AggregateStats, KnockoffCurves, LassoBaseline};
use crate::config::{
    ConfigError, CovarianceMode, DesignRegime, FailurePolicy, LassoRepeats, SimulationConfig,
};
use crate::data::{DataGenerationError, DataGenerator, SyntheticDataset};
use crate::progress::{RunPhase, SimulationObserver};
use crate::scoring::{OutcomeStats, score};
use crate::selection::{
    CovarianceSource, CvLasso, FitError, GaussianKnockoffFilter, KnockoffFilter, L1Selector,
    SelectionAdapter, SelectionError,
};
use crate::types::{AlignmentError, KnockoffSelection, SelectedSet, TrueSupport};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use thiserror::Error;

/// Which selector a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Lasso,
    Knockoff,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Lasso => "lasso",
            Self::Knockoff => "knockoff",
        })
    }
}

#[derive(Error, Debug)]
pub enum RunError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Data generation failed: {0}")]
    Data(#[from] DataGenerationError),
    #[error("Knockoff preparation failed: {0}")]
    Prepare(#[source] FitError),
    #[error("Simulation {sim}: the {method} selector failed: {source}")]
    Fit {
        sim: usize,
        method: Method,
        #[source]
        source: FitError,
    },
    #[error("Simulation {sim}: {source}")]
    Alignment {
        sim: usize,
        #[source]
        source: AlignmentError,
    },
    #[error("Aggregation failed: {0}")]
    Aggregate(#[from] AggregateError),
}

/// The lasso's selection in one simulation, with its score.
#[derive(Debug, Clone, PartialEq)]
pub struct LassoRun {
    pub selected: SelectedSet,
    /// Penalty the selector settled on, if it reports one.
    pub lambda: Option<f64>,
    pub outcome: OutcomeStats,
}

/// Everything one completed simulation produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub sim: usize,
    /// Seed of this simulation's RNG stream.
    pub seed: u64,
    pub true_support: TrueSupport,
    pub lasso: Option<LassoRun>,
    pub knockoff: KnockoffSelection,
    /// One entry per FDR target, in target order.
    pub knockoff_outcomes: Vec<OutcomeStats>,
}

/// A simulation dropped under [`FailurePolicy::Skip`].
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedRun {
    pub sim: usize,
    pub method: Method,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(RunRecord),
    Skipped(SkippedRun),
}

/// Per-simulation results, one entry per simulation in index order.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationResults {
    pub fdr_targets: Vec<f64>,
    pub runs: Vec<RunOutcome>,
}

impl SimulationResults {
    pub fn completed(&self) -> impl Iterator<Item = &RunRecord> {
        self.runs.iter().filter_map(|run| match run {
            RunOutcome::Completed(record) => Some(record),
            RunOutcome::Skipped(_) => None,
        })
    }

    pub fn skipped(&self) -> impl Iterator<Item = &SkippedRun> {
        self.runs.iter().filter_map(|run| match run {
            RunOutcome::Skipped(skipped) => Some(skipped),
            RunOutcome::Completed(_) => None,
        })
    }

    /// The outcome of simulation `sim` at threshold `threshold`, if it completed.
    pub fn outcome(&self, sim: usize, threshold: usize) -> Option<&OutcomeStats> {
        match self.runs.get(sim)? {
            RunOutcome::Completed(record) => record.knockoff_outcomes.get(threshold),
            RunOutcome::Skipped(_) => None,
        }
    }

    pub fn mean_selection_size(&self, threshold: usize) -> Option<f64> {
        let sizes: Vec<usize> = self
            .completed()
            .filter_map(|record| record.knockoff.get(threshold))
            .map(|entry| entry.selected.len())
            .collect();
        if sizes.is_empty() {
            return None;
        }
        Some(sizes.iter().sum::<usize>() as f64 / sizes.len() as f64)
    }

    pub fn lasso_outcomes(&self) -> Vec<OutcomeStats> {
        self.completed()
            .filter_map(|record| record.lasso.as_ref())
            .map(|lasso| lasso.outcome)
            .collect()
    }

    pub fn lasso_lambdas(&self) -> Vec<f64> {
        self.completed()
            .filter_map(|record| record.lasso.as_ref()?.lambda)
            .collect()
    }
}

/// The finished experiment.
#[derive(Debug, Clone)]
pub struct SimulationOutput {
    pub results: SimulationResults,
    pub curves: KnockoffCurves,
    /// `None` when no lasso fit completed.
    pub lasso: Option<LassoBaseline>,
}

impl SimulationOutput {
    pub fn skipped(&self) -> usize {
        self.results.skipped().count()
    }
}

/// Seed of simulation `sim`'s RNG stream (a splitmix64 step over the base seed).
pub fn stream_seed(base: u64, sim: usize) -> u64 {
    let mut z = base.wrapping_add((sim as u64).wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Seed of the lasso's stream within the simulation seeded by `simulation_seed`.
fn lasso_stream_seed(simulation_seed: u64) -> u64 {
    stream_seed(simulation_seed, 0)
}

pub struct SimulationRunner<'a, L, K> {
    config: &'a SimulationConfig,
    generator: DataGenerator,
    adapter: SelectionAdapter<L, K>,
}

impl<'a, L: L1Selector, K: KnockoffFilter> SimulationRunner<'a, L, K> {
    pub fn new(
        config: &'a SimulationConfig,
        generator: DataGenerator,
        adapter: SelectionAdapter<L, K>,
    ) -> Self {
        Self {
            config,
            generator,
            adapter,
        }
    }

    /// Runs every simulation and aggregates the results.
    ///
    /// A fatal failure (an alignment error, or a fit failure under
    /// [`FailurePolicy::Abort`]) stops simulations with a higher index from
    /// starting. Every lower index still runs, so the error returned is always
    /// the one from the lowest failing simulation.
    pub fn run(&self, observer: &dyn SimulationObserver) -> Result<SimulationOutput, RunError> {
        let config = self.config;
        config.validate()?;
        let nsims = config.nsims;

        observer.on_phase_start(RunPhase::Preparation, nsims);
        self.adapter.prepare().map_err(RunError::Prepare)?;
        let shared = match config.design_regime {
            DesignRegime::Fixed => {
                let mut rng = StdRng::seed_from_u64(config.seed);
                Some(self.generator.generate(&mut rng))
            }
            DesignRegime::Fresh => None,
        };
        observer.on_phase_finish(RunPhase::Preparation);

        log::info!(
            "Running {} simulations ({} samples x {} variables, k = {}, {} FDR targets)",
            nsims,
            config.n_samples,
            config.n_vars,
            config.k,
            config.fdr_targets.len()
        );
        let started = Instant::now();
        observer.on_phase_start(RunPhase::Simulations, nsims);
        let first_failure = AtomicUsize::new(usize::MAX);
        let attempts: Vec<Option<Result<RunOutcome, RunError>>> = (0..nsims)
            .into_par_iter()
            .map(|sim| {
                if sim > first_failure.load(Ordering::Relaxed) {
                    return None;
                }
                let attempt = self.simulate(sim, shared.as_ref());
                if attempt.is_err() {
                    first_failure.fetch_min(sim, Ordering::Relaxed);
                }
                observer.on_simulation_complete(sim);
                Some(attempt)
            })
            .collect();
        observer.on_phase_finish(RunPhase::Simulations);
        log::info!("Simulations finished in {:.2?}", started.elapsed());

        observer.on_phase_start(RunPhase::Aggregation, nsims);
        let mut stats = AggregateStats::new(&config.fdr_targets, nsims);
        let mut runs = Vec::with_capacity(nsims);
        // Cancelled simulations all come after the first failure.
        for attempt in attempts.into_iter().flatten() {
            let outcome = attempt?;
            match &outcome {
                RunOutcome::Completed(record) => stats.fold(record.sim, &record.knockoff_outcomes)?,
                RunOutcome::Skipped(_) => stats.record_skip(),
            }
            runs.push(outcome);
        }
        let curves = stats.finalize()?;
        let results = SimulationResults {
            fdr_targets: config.fdr_targets.clone(),
            runs,
        };
        let lasso = LassoBaseline::from_runs(&results.lasso_outcomes(), &results.lasso_lambdas());
        observer.on_phase_finish(RunPhase::Aggregation);

        if stats.skipped() > 0 {
            log::warn!(
                "{} of {} simulations were skipped; curves average the remaining {}",
                stats.skipped(),
                nsims,
                stats.contributed()
            );
        }

        Ok(SimulationOutput {
            results,
            curves,
            lasso,
        })
    }

    fn runs_lasso(&self, sim: usize) -> bool {
        match self.config.lasso_repeats {
            LassoRepeats::Once => sim == 0,
            LassoRepeats::EverySimulation => true,
        }
    }

    fn simulate(
        &self,
        sim: usize,
        shared: Option<&SyntheticDataset>,
    ) -> Result<RunOutcome, RunError> {
        let seed = stream_seed(self.config.seed, sim);
        let mut rng = StdRng::seed_from_u64(seed);
        let fresh;
        let dataset = match shared {
            Some(dataset) => dataset,
            None => {
                fresh = self.generator.generate(&mut rng);
                &fresh
            }
        };
        let x = dataset.design.view();
        let y = dataset.response.view();
        let truth = &dataset.true_support;

        let lasso = if self.runs_lasso(sim) {
            let mut lasso_rng = StdRng::seed_from_u64(lasso_stream_seed(seed));
            match self.adapter.select_lasso(x, y, &mut lasso_rng) {
                Ok((selected, lambda)) => {
                    let outcome = score(&selected, truth, truth.k());
                    Some(LassoRun {
                        selected,
                        lambda,
                        outcome,
                    })
                }
                Err(source) => return self.fit_failure(sim, Method::Lasso, source),
            }
        } else {
            None
        };

        let fdr_targets = &self.config.fdr_targets;
        let knockoff = match self.adapter.select_knockoff(x, y, fdr_targets, &mut rng) {
            Ok(selection) => selection,
            Err(SelectionError::Fit(source)) => {
                return self.fit_failure(sim, Method::Knockoff, source);
            }
            Err(SelectionError::Alignment(source)) => {
                return Err(RunError::Alignment { sim, source });
            }
        };

        let knockoff_outcomes = knockoff
            .iter()
            .map(|threshold| score(&threshold.selected, truth, truth.k()))
            .collect();
        log::debug!("Simulation {sim} complete");

        Ok(RunOutcome::Completed(RunRecord {
            sim,
            seed,
            true_support: truth.clone(),
            lasso,
            knockoff,
            knockoff_outcomes,
        }))
    }

    fn fit_failure(
        &self,
        sim: usize,
        method: Method,
        source: FitError,
    ) -> Result<RunOutcome, RunError> {
        match self.config.failure_policy {
            FailurePolicy::Abort => Err(RunError::Fit {
                sim,
                method,
                source,
            }),
            FailurePolicy::Skip => {
                log::warn!("Skipping simulation {sim}: the {method} selector failed: {source}");
                Ok(RunOutcome::Skipped(SkippedRun {
                    sim,
                    method,
                    reason: source.to_string(),
                }))
            }
        }
    }
}

/// Runs an experiment with the shipped selectors: a cross-validated lasso and
/// a Gaussian knockoff filter thresholded with the configured offset.
pub fn run_experiment(
    config: &SimulationConfig,
    observer: &dyn SimulationObserver,
) -> Result<SimulationOutput, RunError> {
    config.validate()?;
    let generator = DataGenerator::new(config)?;
    let covariance = match config.covariance {
        CovarianceMode::LedoitWolf => CovarianceSource::LedoitWolf,
        CovarianceMode::Known => CovarianceSource::Known(generator.correlation()),
    };
    let knockoff = GaussianKnockoffFilter::new(
        config.knockoff_method,
        covariance,
        CvLasso::with_folds(config.cv_folds),
    )
    .with_offset(config.filter_offset);
    let adapter = SelectionAdapter::new(CvLasso::with_folds(config.cv_folds), knockoff);
    SimulationRunner::new(config, generator, adapter).run(observer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn streams_differ_per_simulation_and_seed() {
        let seeds: HashSet<u64> = (0..1000).map(|sim| stream_seed(2022, sim)).collect();
        assert_eq!(seeds.len(), 1000);
        assert_ne!(stream_seed(1, 0), stream_seed(2, 0));
        assert_eq!(stream_seed(7, 3), stream_seed(7, 3));
    }

    #[test]
    fn lasso_stream_is_distinct_from_every_simulation_stream() {
        let simulation_seeds: HashSet<u64> = (0..1000).map(|sim| stream_seed(2022, sim)).collect();
        for sim in 0..1000 {
            let lasso = lasso_stream_seed(stream_seed(2022, sim));
            assert!(!simulation_seeds.contains(&lasso));
        }
    }

    #[test]
    fn method_names() {
        assert_eq!(Method::Lasso.to_string(), "lasso");
        assert_eq!(Method::Knockoff.to_string(), "knockoff");
    }
}
