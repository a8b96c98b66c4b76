#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod aggregate;
pub mod compare;
pub mod config;
pub mod data;
pub mod progress;
pub mod report;
pub mod runner;
pub mod scoring;
pub mod types;

#[path = "../selection/mod.rs"]
pub mod selection;

pub use config::SimulationConfig;
pub use runner::{SimulationOutput, run_experiment};
