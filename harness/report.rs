//! # Report artifacts
//!
//! The finished experiment as files: a TOML report (configuration, averaged
//! curves, lasso baseline, verdicts) that round-trips through `load`, plus two
//! tab-separated tables for plotting, one row per FDR target and one row per
//! `(simulation, threshold)` pair.

use crate::aggregate::{LassoBaseline, ThresholdSummary};
use crate::compare::{ComparisonReport, compare};
use crate::config::SimulationConfig;
use crate::runner::SimulationOutput;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to read or write report file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to serialize report to TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Failed to parse TOML report: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to write table: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationReport {
    pub contributed: usize,
    pub skipped: usize,
    pub config: SimulationConfig,
    pub thresholds: Vec<ThresholdSummary>,
    pub lasso: Option<LassoBaseline>,
    pub comparison: Option<ComparisonReport>,
}

impl SimulationReport {
    pub fn assemble(config: &SimulationConfig, output: &SimulationOutput) -> Self {
        let comparison = output
            .lasso
            .as_ref()
            .and_then(|lasso| compare(&output.curves, lasso, config.reference_target));
        Self {
            contributed: output.curves.runs,
            skipped: output.skipped(),
            config: config.clone(),
            thresholds: output.curves.summaries(),
            lasso: output.lasso.clone(),
            comparison,
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ReportError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ReportError> {
        let toml_string = fs::read_to_string(path)?;
        Ok(toml::from_str(&toml_string)?)
    }
}

fn tsv_writer(path: &Path) -> Result<csv::Writer<fs::File>, ReportError> {
    Ok(csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?)
}

/// One row per FDR target: `target, power, fdr, mean_selected`.
pub fn write_curves_tsv(output: &SimulationOutput, path: impl AsRef<Path>) -> Result<(), ReportError> {
    let mut writer = tsv_writer(path.as_ref())?;
    for summary in output.curves.summaries() {
        writer.serialize(summary)?;
    }
    writer.flush()?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct RunRow {
    sim: usize,
    threshold: usize,
    target: f64,
    selected: usize,
    true_positives: usize,
    false_positives: usize,
    false_negatives: usize,
    power: f64,
    fdr: f64,
}

/// One row per completed simulation and threshold.
pub fn write_runs_tsv(output: &SimulationOutput, path: impl AsRef<Path>) -> Result<(), ReportError> {
    let mut writer = tsv_writer(path.as_ref())?;
    for record in output.results.completed() {
        for (threshold, (entry, outcome)) in record
            .knockoff
            .iter()
            .zip(&record.knockoff_outcomes)
            .enumerate()
        {
            writer.serialize(RunRow {
                sim: record.sim,
                threshold,
                target: entry.target,
                selected: outcome.selected(),
                true_positives: outcome.true_positives,
                false_positives: outcome.false_positives,
                false_negatives: outcome.false_negatives,
                power: outcome.power,
                fdr: outcome.fdr,
            })?;
        }
    }
    writer.flush()?;
    Ok(())
}
