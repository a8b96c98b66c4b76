use std::fmt;

/// Phases of an experiment, reported to observers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RunPhase {
    Preparation,
    Simulations,
    Aggregation,
}

impl RunPhase {
    pub fn describe(self) -> &'static str {
        match self {
            Self::Preparation => "knockoff sampler preparation",
            Self::Simulations => "Monte Carlo simulations",
            Self::Aggregation => "aggregation",
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Observer for reporting progress while simulations run.
///
/// Simulations finish on worker threads in no particular order, so every hook
/// takes `&self`.
pub trait SimulationObserver: Sync {
    fn on_phase_start(&self, phase: RunPhase, total_simulations: usize) {
        let _ = (phase, total_simulations);
    }
    fn on_simulation_complete(&self, sim: usize) {
        let _ = sim;
    }
    fn on_phase_finish(&self, phase: RunPhase) {
        let _ = phase;
    }
}

#[derive(Default)]
pub struct NoopObserver;

impl SimulationObserver for NoopObserver {}
