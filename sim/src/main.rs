use std::{env, fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use insgps_sim::{config::SimConfig, parameters::parse_string, runner::SimulationRunner};
use log::info;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Parameter file
    #[arg(short, long, default_value = "config/params.toml")]
    params: PathBuf,

    /// Write one CSV row per navigation solution
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Overrides sim.duration_s
    #[arg(short, long)]
    duration_s: Option<f64>,

    /// Overrides sim.seed
    #[arg(short, long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    // Default log level to "info"
    if env::var("RUST_LOG").is_err() {
        unsafe { env::set_var("RUST_LOG", "info") }
    }

    pretty_env_logger::init();

    let args = Args::parse();

    let toml = fs::read_to_string(&args.params)
        .with_context(|| format!("Could not read {}", args.params.display()))?;
    let mut config = SimConfig::from_params(&parse_string(&toml)?)?;

    if let Some(duration_s) = args.duration_s {
        config.duration_s = duration_s;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }

    let mut writer = args
        .output
        .as_ref()
        .map(csv::Writer::from_path)
        .transpose()
        .context("Could not create output file")?;

    let summary = SimulationRunner::new(config)?.run(|row| {
        if let Some(writer) = writer.as_mut() {
            writer.serialize(row)?;
        }
        Ok(())
    })?;

    if let Some(writer) = writer.as_mut() {
        writer.flush()?;
    }

    match (summary.final_attitude_err_deg, summary.final_pos_err_m) {
        (Some(att), Some(pos)) => info!(
            "Final attitude error {att:.2} deg, position error {pos:.2} m over {} solutions",
            summary.rows
        ),
        _ => info!("No navigation solution was published"),
    }

    Ok(())
}
