//! Assembling a ready-to-run [`Context`] from a [`ScenarioData`].
//!
//! Construction order fixes activation order, and with it every tie-break in
//! the run: markets first, then root facilities, then builders, each in file
//! order. Prototypes are registered before anything is activated.

use crate::loader::{DataLoadError, check_unique, deserialize_file, require_data_file, resolve_name};
use crate::schema::ScenarioData;
use agora_core::context::Context;
use agora_core::model::{Model, Params, params};
use agora_core::plugin::PluginRegistry;
use agora_core::recorder::Backend;
use std::path::Path;
use tracing::{debug, info};

/// Base name looked up by [`load_scenario_dir`].
pub const SCENARIO_FILE: &str = "scenario";

/// Check names and cross-references without building anything.
pub fn validate(data: &ScenarioData) -> Result<(), DataLoadError> {
    let prototypes = check_unique(data.prototypes.iter().map(|p| p.name.as_str()), "prototype")?;
    check_unique(
        data.markets
            .iter()
            .map(|m| m.name.as_str())
            .chain(data.facilities.iter().map(|f| f.name.as_str()))
            .chain(data.builders.iter().map(|b| b.name.as_str())),
        "model",
    )?;
    for builder in &data.builders {
        for entry in &builder.schedule {
            resolve_name(&prototypes, entry.prototype(), &builder.name, "prototype")?;
        }
    }
    Ok(())
}

/// Build a context for `data`, constructing every model through `registry`.
pub fn build_scenario(
    data: &ScenarioData,
    registry: &PluginRegistry,
    backend: Box<dyn Backend>,
) -> Result<Context, DataLoadError> {
    validate(data)?;
    let mut ctx = Context::new(data.simulation.clone(), backend)?;

    for proto in &data.prototypes {
        let model = construct(&ctx, registry, &proto.plugin, &proto.name, &proto.params)?;
        ctx.add_prototype(&proto.name, model)?;
    }

    for market in &data.markets {
        let config = params([("commodity", market.commodity.as_str())]);
        let model = construct(&ctx, registry, &market.plugin, &market.name, &config)?;
        ctx.deploy(model)?;
    }

    for facility in &data.facilities {
        let model = construct(&ctx, registry, &facility.plugin, &facility.name, &facility.params)?;
        ctx.deploy(model)?;
    }

    for builder in &data.builders {
        let model = construct(&ctx, registry, &builder.plugin, &builder.name, &Params::new())?;
        let id = ctx.deploy(model)?;
        for entry in &builder.schedule {
            ctx.schedule(id, entry.prototype(), entry.tick())?;
        }
        debug!(
            builder = %builder.name,
            entries = builder.schedule.len(),
            "builder scheduled"
        );
    }

    info!(
        prototypes = data.prototypes.len(),
        models = ctx.active_count(),
        start = data.simulation.start,
        duration = data.simulation.duration,
        "scenario built"
    );
    Ok(ctx)
}

/// Read a scenario file (format from its extension) and build it.
pub fn load_scenario(
    path: &Path,
    registry: &PluginRegistry,
    backend: Box<dyn Backend>,
) -> Result<Context, DataLoadError> {
    let data: ScenarioData = deserialize_file(path)?;
    debug!(file = %path.display(), "scenario file parsed");
    build_scenario(&data, registry, backend)
}

/// Load `scenario.{ron,toml,json}` from `dir`.
pub fn load_scenario_dir(
    dir: &Path,
    registry: &PluginRegistry,
    backend: Box<dyn Backend>,
) -> Result<Context, DataLoadError> {
    let path = require_data_file(dir, SCENARIO_FILE)?;
    load_scenario(&path, registry, backend)
}

fn construct(
    ctx: &Context,
    registry: &PluginRegistry,
    plugin: &str,
    name: &str,
    config: &Params,
) -> Result<Box<dyn Model>, DataLoadError> {
    let mut model = registry
        .load(plugin)
        .and_then(|factory| factory.construct(ctx))
        .map_err(agora_core::context::SimError::from)?;
    model.set_name(name);
    model
        .configure(config)
        .map_err(|source| DataLoadError::Configure {
            name: name.to_string(),
            source,
        })?;
    Ok(model)
}
