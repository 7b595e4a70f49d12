use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use swarm_simulator::{SimulationReport, scenario_runner};

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless swarm scenario runner")]
struct Args {
    /// Scenario file to run.
    #[arg(long)]
    scenario: PathBuf,

    /// Write a JSON trace of the finished simulation.
    #[arg(long)]
    trace_out: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt::init();
    info!("swarm-sim-cli starting…");

    let scenario = scenario_runner::load_scenario(&args.scenario)?;
    let report = scenario_runner::run(&scenario)?;
    info!(
        "scenario '{}' finished after {} ms, {} packets",
        scenario.name, report.duration_ms, report.packet_count
    );

    if let Some(trace_path) = &args.trace_out {
        write_trace(trace_path, &report)?;
    }

    Ok(())
}

fn write_trace(path: &Path, report: &SimulationReport) -> Result<()> {
    let data = serde_json::to_vec_pretty(report).context("Failed to serialize simulation trace")?;
    fs::write(path, &data)
        .with_context(|| format!("Failed to write trace file {}", path.display()))?;
    Ok(())
}
