//! Agora Data -- data-driven scenario loading for the Agora engine.
//!
//! A scenario file (RON, TOML, or JSON, detected by extension) declares the
//! run configuration, prototypes, markets, root facilities, and builders with
//! their schedules. [`load_scenario`] turns it into a ready
//! [`agora_core::context::Context`].

pub mod loader;
pub mod scenario;
pub mod schema;

pub use loader::DataLoadError;
pub use scenario::{build_scenario, load_scenario, load_scenario_dir};
pub use schema::ScenarioData;
