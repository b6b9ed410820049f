use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use nalgebra::Matrix3;
use serde_json::json;

use apax_driver::config::DriverConfig;
use apax_driver::core::units::{self, Quantity};
use apax_driver::engine::adapter::{split_param_string, PotentialAdapter};
use apax_driver::error::{DriverError, USAGE};

// --- CLI Definitions ---

#[derive(Parser, Debug)]
#[command(author, version, about = "Unit-normalizing driver for apax machine-learned potentials", long_about = None)]
struct Args {
    /// Driver parameters: "<model_dir>,<template.xyz>"
    #[arg(short = 'o', long = "param")]
    param: Option<String>,

    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Backend executable (overrides the config file)
    #[arg(long)]
    backend_command: Option<String>,

    /// Extra backend argument, repeatable (overrides the config file)
    #[arg(long = "backend-arg")]
    backend_args: Vec<String>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

// --- Initialization Helpers ---

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn load_config(args: &Args) -> Result<DriverConfig> {
    let mut config = match &args.config {
        Some(path) => DriverConfig::from_file(path)?,
        None => DriverConfig::default(),
    };
    if let Some(cmd) = &args.backend_command {
        config.backend.command = cmd.clone();
    }
    if !args.backend_args.is_empty() {
        config.backend.args = args.backend_args.clone();
    }
    Ok(config)
}

// --- Main ---

fn main() -> Result<()> {
    // 1. Parsing
    let args = Args::parse();
    init_logging(args.verbose);
    let config = load_config(&args)?;

    // 2. Pre-flight backend probe, then argument check and construction
    let driver_args = split_param_string(args.param.as_deref().unwrap_or(""));
    let mut driver = match PotentialAdapter::launch(&driver_args, &config) {
        Ok(d) => d,
        Err(e @ DriverError::BackendUnavailable { .. }) => {
            eprintln!("{}", e);
            process::exit(2);
        }
        Err(DriverError::Usage { .. }) => {
            eprintln!("{}", USAGE);
            process::exit(1);
        }
        Err(e) => return Err(e).context("Failed to initialize driver"),
    };

    // 3. Single-point evaluation of the template geometry
    let structure = driver.structure();
    let cell = structure
        .lattice
        .as_ref()
        .map(|lat| units::mat_to_internal(Quantity::Length, &lat.vectors.transpose()))
        .unwrap_or_else(Matrix3::zeros);
    let positions: Vec<f64> = structure
        .positions()
        .iter()
        .flat_map(|p| {
            let p = units::vec_to_internal(Quantity::Length, &p.coords);
            [p.x, p.y, p.z]
        })
        .collect();

    info!(
        "Evaluating template geometry ({} atoms) with {}",
        structure.len(),
        driver.potential_name()
    );
    let output = driver
        .evaluate(&cell, &positions)
        .context("Single-point evaluation failed")?;

    let rows = |m: &Matrix3<f64>| -> Vec<[f64; 3]> {
        (0..3).map(|i| [m[(i, 0)], m[(i, 1)], m[(i, 2)]]).collect()
    };
    let report = json!({
        "energy": output.energy,
        "forces": output.forces.iter().map(|f| [f.x, f.y, f.z]).collect::<Vec<_>>(),
        "virial": rows(&output.virial),
        "stress": driver.last_stress().as_ref().map(rows),
        "extras": output.extras.as_wire_str(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
