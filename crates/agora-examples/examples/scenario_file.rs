//! Scenario file example: load a RON/TOML/JSON scenario and run it.
//!
//! Records go to a binary log next to the scenario, which is read back at the
//! end to count what was persisted.
//!
//! Run with:
//! `cargo run -p agora-examples --example scenario_file -- crates/agora-data/scenarios/dairy.toml`

use agora_core::plugin::PluginRegistry;
use agora_core::recorder::{BinaryLogBackend, Record, read_binary_log};
use agora_data::load_scenario;
use std::error::Error;
use std::fs::File;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("crates/agora-data/scenarios/dairy.ron"));
    let log_path = path.with_extension("log");

    let registry = PluginRegistry::with_builtins();
    let backend = BinaryLogBackend::create(&log_path)?;
    let mut ctx = load_scenario(&path, &registry, Box::new(backend))?;
    let summary = ctx.run()?;

    let records = read_binary_log(File::open(&log_path)?)?;
    let transactions = records
        .iter()
        .filter(|r| matches!(r, Record::Transaction(_)))
        .count();
    info!(
        file = %path.display(),
        log = %log_path.display(),
        records = records.len(),
        transactions,
        "scenario complete"
    );
    println!(
        "{} ticks, {} transactions, history hash {:#018x}",
        summary.ticks_run, summary.transactions, summary.history_hash
    );
    Ok(())
}
