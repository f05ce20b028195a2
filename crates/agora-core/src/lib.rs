//! Agora Core -- a deterministic, tick-based commodity-flow simulation engine.
//!
//! Facilities produce and consume commodities, markets clear their offers
//! against requests once per tick, and builders deploy new facilities from a
//! catalog of prototypes on a fixed schedule. Every cleared transaction and
//! every change to the set of active models is handed to an event recorder.
//!
//! # Tick Pipeline
//!
//! Each call to [`context::Context::step`] advances the simulation by one
//! tick:
//!
//! 1. **Step** -- model hooks run in activation order; builder deployments
//!    take effect immediately.
//! 2. **Collect** -- facilities emit offers and requests.
//! 3. **Clear** -- markets match offers against requests.
//! 4. **Settle** -- transactions are delivered, recorded, and hashed.
//! 5. **Bookkeeping** -- expired facilities are decommissioned, the clock
//!    advances.
//!
//! # Setup
//!
//! ```rust,ignore
//! let registry = PluginRegistry::with_builtins();
//! let mut ctx = Context::new(SimConfig::new(0, 25, 0.0), Box::new(NullBackend))?;
//! let mut farm = registry.load("Source")?.construct(&ctx)?;
//! farm.configure(&params([("rate", 100.0)]))?;
//! ctx.add_prototype("dairy farm", farm)?;
//! let deployer = ctx.deploy(registry.load("Builder")?.construct(&ctx)?)?;
//! ctx.schedule(deployer, "dairy farm", 0)?;
//! let summary = ctx.run()?;
//! ```
//!
//! # Key Types
//!
//! - [`context::Context`] -- Owns the clock, the active models, the catalog,
//!   and the recorder for one run.
//! - [`model::Model`] -- The polymorphic model trait with checked capability
//!   accessors.
//! - [`plugin::PluginRegistry`] -- Name-keyed model constructors.
//! - [`catalog::PrototypeCatalog`] -- Immutable prototypes for deployment.
//! - [`builder::Builder`] -- The deployment scheduler.
//! - [`market::clear`] -- The greedy clearing policy.
//! - [`recorder::EventRecorder`] -- Batched, best-effort event recording.
//! - [`fixed::Quantity`] -- Q32.32 fixed-point quantities.

pub mod builder;
pub mod catalog;
pub mod commodity;
pub mod context;
pub mod facility;
pub mod fixed;
pub mod id;
pub mod market;
pub mod model;
pub mod plugin;
pub mod query;
pub mod recorder;
pub mod sim;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
