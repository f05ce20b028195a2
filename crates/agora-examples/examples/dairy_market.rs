//! Dairy market example: one farm, a growing fleet of incinerators.
//!
//! Builds the scenario by hand through the plugin registry, exactly as a host
//! program would: construct and configure prototypes, deploy the market and a
//! builder at the root, schedule deployments, and run 25 ticks. Every record
//! is written as JSON lines to `dairy.jsonl` in the working directory.
//!
//! Run with: `RUST_LOG=debug cargo run -p agora-examples --example dairy_market`

use agora_core::context::Context;
use agora_core::model::{ParamValue, params};
use agora_core::plugin::PluginRegistry;
use agora_core::recorder::JsonLinesBackend;
use agora_core::sim::SimConfig;
use std::error::Error;
use std::fs::File;
use std::io::BufWriter;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let registry = PluginRegistry::with_builtins();
    let log = BufWriter::new(File::create("dairy.jsonl")?);
    let mut ctx = Context::new(
        SimConfig::new(0, 25, 0.0),
        Box::new(JsonLinesBackend::new(log)),
    )?;

    // --- Prototypes ---

    let mut farm = registry.load("Source")?.construct(&ctx)?;
    farm.configure(&params([
        ("rate", ParamValue::from(100.0)),
        ("commodity", ParamValue::from("milk")),
        ("quality", ParamValue::from("milk")),
        ("units", ParamValue::from("kg")),
    ]))?;
    ctx.add_prototype("dairy farm", farm)?;

    let mut incinerator = registry.load("Sink")?.construct(&ctx)?;
    incinerator.configure(&params([
        ("rate", ParamValue::from(50.0)),
        ("capacity", ParamValue::from(1000.0)),
        ("commodity", ParamValue::from("milk")),
        ("quality", ParamValue::from("milk")),
        ("units", ParamValue::from("kg")),
    ]))?;
    ctx.add_prototype("milk incinerator", incinerator)?;

    // --- Root models ---

    let mut builder = registry.load("Builder")?.construct(&ctx)?;
    builder.set_name("deployer");
    let deployer = ctx.deploy(builder)?;
    for (prototype, tick) in [
        ("dairy farm", 0),
        ("milk incinerator", 0),
        ("milk incinerator", 5),
        ("milk incinerator", 10),
        ("dairy farm", 15),
        ("milk incinerator", 20),
    ] {
        ctx.schedule(deployer, prototype, tick)?;
    }

    let mut market = registry.load("Market")?.construct(&ctx)?;
    market.set_name("milk market");
    market.configure(&params([("commodity", "milk")]))?;
    ctx.deploy(market)?;

    // --- Run ---

    let summary = ctx.run()?;
    info!(
        ticks = summary.ticks_run,
        transactions = summary.transactions,
        incomplete = summary.history_incomplete,
        "dairy run complete"
    );

    for snapshot in ctx.snapshot_models() {
        match snapshot.fill_level {
            Some(fill) => println!("{:<20} {:>8} kg", snapshot.name, fill),
            None => println!("{:<20} {:>8}", snapshot.name, snapshot.impl_id),
        }
    }
    println!("history hash: {:#018x}", summary.history_hash);
    Ok(())
}
