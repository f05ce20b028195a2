//! Serde structs for scenario files.
//!
//! A scenario names the run configuration, the prototypes available for
//! deployment, and the root models (markets, facilities, builders) that are
//! active from the first tick. Files may be RON, TOML, or JSON.

use agora_core::fixed::Tick;
use agora_core::model::Params;
use agora_core::sim::SimConfig;
use serde::Deserialize;

// ===========================================================================
// Scenario
// ===========================================================================

/// A complete scenario definition.
#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioData {
    pub simulation: SimConfig,
    #[serde(default)]
    pub prototypes: Vec<PrototypeData>,
    #[serde(default)]
    pub markets: Vec<MarketData>,
    /// Facilities deployed as roots before the first tick.
    #[serde(default)]
    pub facilities: Vec<FacilityData>,
    #[serde(default)]
    pub builders: Vec<BuilderData>,
}

// ===========================================================================
// Prototypes and root facilities
// ===========================================================================

/// A named, fully parameterized template.
#[derive(Debug, Clone, Deserialize)]
pub struct PrototypeData {
    pub name: String,
    /// Plugin that constructs the model, e.g. `"Source"` or `"Sink"`.
    pub plugin: String,
    #[serde(default)]
    pub params: Params,
}

/// A facility active from the start, outside any schedule.
#[derive(Debug, Clone, Deserialize)]
pub struct FacilityData {
    pub name: String,
    pub plugin: String,
    #[serde(default)]
    pub params: Params,
}

// ===========================================================================
// Markets
// ===========================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct MarketData {
    pub name: String,
    #[serde(default = "default_market_plugin")]
    pub plugin: String,
    pub commodity: String,
}

fn default_market_plugin() -> String {
    "Market".to_string()
}

// ===========================================================================
// Builders
// ===========================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct BuilderData {
    pub name: String,
    #[serde(default = "default_builder_plugin")]
    pub plugin: String,
    #[serde(default)]
    pub schedule: Vec<ScheduleEntryData>,
}

fn default_builder_plugin() -> String {
    "Builder".to_string()
}

/// A schedule entry, in short tuple form or with explicit fields.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ScheduleEntryData {
    /// Short form: `("prototype", tick)`.
    Short(String, Tick),
    /// Full form: `{ prototype = "...", tick = 5 }`.
    Full { prototype: String, tick: Tick },
}

impl ScheduleEntryData {
    pub fn prototype(&self) -> &str {
        match self {
            ScheduleEntryData::Short(prototype, _) => prototype,
            ScheduleEntryData::Full { prototype, .. } => prototype,
        }
    }

    pub fn tick(&self) -> Tick {
        match self {
            ScheduleEntryData::Short(_, tick) => *tick,
            ScheduleEntryData::Full { tick, .. } => *tick,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_core::model::ParamValue;

    #[test]
    fn schedule_entry_short_and_full_json() {
        let entries: Vec<ScheduleEntryData> =
            serde_json::from_str(r#"[["farm", 3], {"prototype": "sink", "tick": 5}]"#).unwrap();
        assert_eq!(entries[0].prototype(), "farm");
        assert_eq!(entries[0].tick(), 3);
        assert_eq!(
            entries[1],
            ScheduleEntryData::Full {
                prototype: "sink".to_string(),
                tick: 5
            }
        );
    }

    #[test]
    fn schedule_entry_full_toml() {
        let data: BuilderData = toml::from_str(
            r#"
            name = "deployer"
            schedule = [{ prototype = "farm", tick = 0 }, ["sink", 2]]
            "#,
        )
        .unwrap();
        assert_eq!(data.plugin, "Builder");
        assert_eq!(data.schedule.len(), 2);
        assert_eq!(data.schedule[1].prototype(), "sink");
    }

    #[test]
    fn params_keep_value_kinds() {
        let data: PrototypeData = ron::from_str(
            r#"(name: "farm", plugin: "Source", params: {"rate": 100.0, "lifetime": 10, "commodity": "milk"})"#,
        )
        .unwrap();
        assert_eq!(data.params["rate"], ParamValue::Float(100.0));
        assert_eq!(data.params["lifetime"], ParamValue::Int(10));
        assert_eq!(data.params["commodity"], ParamValue::Text("milk".to_string()));
    }

    #[test]
    fn market_plugin_defaults() {
        let data: MarketData =
            serde_json::from_str(r#"{"name": "milk market", "commodity": "milk"}"#).unwrap();
        assert_eq!(data.plugin, "Market");
    }
}
