#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use itertools::Itertools;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process;
use std::sync::Mutex;

use knockbench::config::{
    CovarianceMode, DesignRegime, FailurePolicy, LassoRepeats, SimulationConfig, SupportRule,
};
use knockbench::progress::{RunPhase, SimulationObserver};
use knockbench::report::{SimulationReport, write_curves_tsv, write_runs_tsv};
use knockbench::run_experiment;
use knockbench::selection::{FilterOffset, KnockoffMethod};

#[derive(Clone, Copy, ValueEnum)]
pub enum KnockoffMethodCli {
    Equi,
    Mvr,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum FilterOffsetCli {
    Knockoff,
    KnockoffPlus,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum CovarianceCli {
    LedoitWolf,
    Known,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum DesignRegimeCli {
    Fresh,
    Fixed,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum LassoRepeatsCli {
    Once,
    EverySimulation,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum SupportCli {
    Random,
    Leading,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum FailurePolicyCli {
    Abort,
    Skip,
}

#[derive(Args)]
pub struct RunArgs {
    /// TOML configuration file; command-line flags override its values
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory for report.toml, curves.tsv and runs.tsv
    #[arg(long, value_name = "DIR", default_value = "knockbench_out")]
    pub out_dir: PathBuf,

    /// Number of samples (rows of the design)
    #[arg(long, value_name = "N")]
    pub n_samples: Option<usize>,

    /// Number of candidate variables (columns of the design)
    #[arg(long, value_name = "P")]
    pub n_vars: Option<usize>,

    /// Toeplitz correlation parameter, corr(x_i, x_j) = rho^|i-j|
    #[arg(long)]
    pub rho: Option<f64>,

    /// Number of causal variables
    #[arg(long)]
    pub k: Option<usize>,

    /// Number of Monte Carlo simulations
    #[arg(long)]
    pub nsims: Option<usize>,

    /// Base seed; each simulation derives its own stream from it
    #[arg(long)]
    pub seed: Option<u64>,

    /// Comma-separated FDR targets swept by the knockoff filter
    #[arg(long, value_delimiter = ',', value_name = "Q,...")]
    pub fdr_targets: Option<Vec<f64>>,

    /// FDR target at which knockoffs and the lasso are compared
    #[arg(long)]
    pub reference_target: Option<f64>,

    /// Number of cross-validation folds for every lasso fit
    #[arg(long)]
    pub cv_folds: Option<usize>,

    #[arg(long, value_enum)]
    pub knockoff_method: Option<KnockoffMethodCli>,

    /// Threshold offset: knockoff (0) or knockoff-plus (1)
    #[arg(long, value_enum)]
    pub filter_offset: Option<FilterOffsetCli>,

    #[arg(long, value_enum)]
    pub covariance: Option<CovarianceCli>,

    #[arg(long, value_enum)]
    pub design_regime: Option<DesignRegimeCli>,

    #[arg(long, value_enum)]
    pub lasso_repeats: Option<LassoRepeatsCli>,

    #[arg(long, value_enum)]
    pub support: Option<SupportCli>,

    #[arg(long, value_enum)]
    pub failure_policy: Option<FailurePolicyCli>,
}

impl RunArgs {
    fn resolve_config(&self) -> Result<SimulationConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => SimulationConfig::load(path)?,
            None => SimulationConfig::default(),
        };

        if let Some(value) = self.n_samples {
            config.n_samples = value;
        }
        if let Some(value) = self.n_vars {
            config.n_vars = value;
        }
        if let Some(value) = self.rho {
            config.rho = value;
        }
        if let Some(value) = self.k {
            config.k = value;
        }
        if let Some(value) = self.nsims {
            config.nsims = value;
        }
        if let Some(value) = self.seed {
            config.seed = value;
        }
        if let Some(values) = &self.fdr_targets {
            config.fdr_targets = values.clone();
        }
        if let Some(value) = self.reference_target {
            config.reference_target = value;
        }
        if let Some(value) = self.cv_folds {
            config.cv_folds = value;
        }
        if let Some(method) = self.knockoff_method {
            config.knockoff_method = match method {
                KnockoffMethodCli::Equi => KnockoffMethod::Equi,
                KnockoffMethodCli::Mvr => KnockoffMethod::Mvr,
            };
        }
        if let Some(offset) = self.filter_offset {
            config.filter_offset = match offset {
                FilterOffsetCli::Knockoff => FilterOffset::Knockoff,
                FilterOffsetCli::KnockoffPlus => FilterOffset::KnockoffPlus,
            };
        }
        if let Some(mode) = self.covariance {
            config.covariance = match mode {
                CovarianceCli::LedoitWolf => CovarianceMode::LedoitWolf,
                CovarianceCli::Known => CovarianceMode::Known,
            };
        }
        if let Some(regime) = self.design_regime {
            config.design_regime = match regime {
                DesignRegimeCli::Fresh => DesignRegime::Fresh,
                DesignRegimeCli::Fixed => DesignRegime::Fixed,
            };
        }
        if let Some(repeats) = self.lasso_repeats {
            config.lasso_repeats = match repeats {
                LassoRepeatsCli::Once => LassoRepeats::Once,
                LassoRepeatsCli::EverySimulation => LassoRepeats::EverySimulation,
            };
        }
        if let Some(rule) = self.support {
            config.support = match rule {
                SupportCli::Random => SupportRule::Random,
                SupportCli::Leading => SupportRule::Leading,
            };
        }
        if let Some(policy) = self.failure_policy {
            config.failure_policy = match policy {
                FailurePolicyCli::Abort => FailurePolicy::Abort,
                FailurePolicyCli::Skip => FailurePolicy::Skip,
            };
        }

        config.validate()?;
        Ok(config)
    }
}

fn create_progress_bar(len: u64, message: &str) -> ProgressBar {
    let draw_target = if std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(20)
    } else {
        ProgressDrawTarget::hidden()
    };

    let pb = ProgressBar::with_draw_target(Some(len), draw_target);
    if let Ok(style) = ProgressStyle::with_template(
        "\n> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    ) {
        pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
    }
    pb.set_message(message.to_string());

    pb
}

/// Draws one bar for the simulation phase.
#[derive(Default)]
struct ProgressBarObserver {
    bar: Mutex<Option<ProgressBar>>,
}

impl SimulationObserver for ProgressBarObserver {
    fn on_phase_start(&self, phase: RunPhase, total_simulations: usize) {
        if phase == RunPhase::Simulations
            && let Ok(mut slot) = self.bar.lock()
        {
            *slot = Some(create_progress_bar(
                total_simulations as u64,
                &phase.to_string(),
            ));
        }
    }

    fn on_simulation_complete(&self, sim: usize) {
        if let Ok(slot) = self.bar.lock()
            && let Some(bar) = slot.as_ref()
        {
            bar.inc(1);
            log::debug!("simulation {sim} done");
        }
    }

    fn on_phase_finish(&self, phase: RunPhase) {
        if phase == RunPhase::Simulations
            && let Ok(mut slot) = self.bar.lock()
            && let Some(bar) = slot.take()
        {
            bar.finish_and_clear();
        }
    }
}

fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.resolve_config()?;
    println!(
        "Simulating {} x {} designs (rho = {}, k = {}) over {} runs; FDR targets [{}]",
        config.n_samples,
        config.n_vars,
        config.rho,
        config.k,
        config.nsims,
        config.fdr_targets.iter().join(", ")
    );

    let observer = ProgressBarObserver::default();
    let output = run_experiment(&config, &observer)?;
    let report = SimulationReport::assemble(&config, &output);

    match &report.lasso {
        Some(lasso) => {
            println!("\nLasso ({} fit(s))", lasso.runs);
            println!("  selected: {:.1}", lasso.selected);
            println!(
                "  TP / FP / FN: {:.1} / {:.1} / {:.1}",
                lasso.true_positives, lasso.false_positives, lasso.false_negatives
            );
            println!("  power: {:.4}", lasso.power);
            println!("  FDR:   {:.4}", lasso.fdr);
            if let Some(lambda) = lasso.lambda {
                println!("  lambda (CV): {lambda:.4e}");
            }
        }
        None => println!("\nLasso: no fit completed"),
    }

    println!(
        "\nKnockoffs ({} contributing, {} skipped)",
        report.contributed, report.skipped
    );
    println!("  {:>8} {:>10} {:>10} {:>10}", "target", "power", "FDR", "selected");
    for row in &report.thresholds {
        println!(
            "  {:>8.3} {:>10.4} {:>10.4} {:>10.1}",
            row.target, row.power, row.fdr, row.mean_selected
        );
    }

    if let Some(comparison) = &report.comparison {
        println!("\n{comparison}");
    }

    std::fs::create_dir_all(&args.out_dir)?;
    let report_path = args.out_dir.join("report.toml");
    report.save(&report_path)?;
    write_curves_tsv(&output, args.out_dir.join("curves.tsv"))?;
    write_runs_tsv(&output, args.out_dir.join("runs.tsv"))?;
    println!("\nReport written to: {}", report_path.display());
    Ok(())
}

fn init_config(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    SimulationConfig::default().save(&path)?;
    println!("Default configuration written to: {}", path.display());
    Ok(())
}

#[derive(Parser)]
#[command(
    name = "knockbench",
    about = "Monte Carlo power and FDR comparison of knockoff filters and the cross-validated lasso",
    long_about = "Simulates sparse linear models with Toeplitz-correlated designs, runs a \
                 cross-validated lasso and a Gaussian knockoff filter on each, and reports \
                 averaged power and false discovery rate across target FDR levels."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an experiment
    #[command(about = "Run an experiment (outputs: report.toml, curves.tsv, runs.tsv)")]
    Run(RunArgs),

    /// Write the default configuration as TOML
    #[command(about = "Write the default configuration to a TOML file")]
    InitConfig {
        #[arg(value_name = "PATH", default_value = "knockbench.toml")]
        path: PathBuf,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let Cli { command } = cli;

    let result = match command {
        Some(Commands::Run(args)) => run(args),
        Some(Commands::InitConfig { path }) => init_config(path),
        None => Cli::command()
            .print_help()
            .map(|()| println!())
            .map_err(|e| e.into()),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
