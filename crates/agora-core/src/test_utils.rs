//! Shared test helpers for unit tests, integration tests, and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]`.

use crate::builder::Builder;
use crate::commodity::{Commodity, Offer, Origin, Request};
use crate::context::Context;
use crate::facility::{Sink, Source};
use crate::fixed::{Tick, qty};
use crate::id::ModelId;
use crate::market::CommodityMarket;
use crate::recorder::{Backend, NullBackend, Record, RecordError};
use crate::sim::SimConfig;
use slotmap::SlotMap;

// ===========================================================================
// Commodities and facilities
// ===========================================================================

pub fn milk() -> Commodity {
    Commodity::new("milk", "kg")
}

pub fn make_source(name: &str, rate: f64) -> Source {
    Source::new(name, milk(), qty(rate))
}

pub fn make_sink(name: &str, rate: f64, capacity: f64) -> Sink {
    Sink::new(name, milk(), qty(rate), qty(capacity))
}

// ===========================================================================
// Scenarios
// ===========================================================================

/// The deployment schedule of the dairy scenario: one farm, three
/// incinerators staggered five ticks apart, a second farm at 15, and a fourth
/// incinerator at 20.
pub fn dairy_schedule() -> Vec<(&'static str, Tick)> {
    vec![
        ("dairy farm", 0),
        ("milk incinerator", 0),
        ("milk incinerator", 5),
        ("milk incinerator", 10),
        ("dairy farm", 15),
        ("milk incinerator", 20),
    ]
}

/// A context with the dairy prototypes (`dairy farm`: 100 kg/tick,
/// `milk incinerator`: 50 kg/tick up to 1000 kg), a `milk market`, and a
/// `deployer` builder carrying `schedule`.
pub fn dairy_context(schedule: &[(&str, Tick)], duration: u64) -> Context {
    dairy_context_with(Box::new(NullBackend), schedule, duration)
}

pub fn dairy_context_with(
    backend: Box<dyn Backend>,
    schedule: &[(&str, Tick)],
    duration: u64,
) -> Context {
    let mut ctx = Context::new(SimConfig::new(0, duration, 0.0), backend).unwrap();
    ctx.add_prototype("dairy farm", Box::new(make_source("dairy farm", 100.0)))
        .unwrap();
    ctx.add_prototype(
        "milk incinerator",
        Box::new(make_sink("milk incinerator", 50.0, 1000.0)),
    )
    .unwrap();
    ctx.deploy(Box::new(CommodityMarket::new("milk market", "milk")))
        .unwrap();
    let builder = ctx.deploy(Box::new(Builder::new("deployer"))).unwrap();
    for &(prototype, tick) in schedule {
        ctx.schedule(builder, prototype, tick).unwrap();
    }
    ctx
}

// ===========================================================================
// Raw market input
// ===========================================================================

/// `n` distinct model ids with activation ranks `0..n`.
pub fn origins(n: usize, tick: Tick) -> Vec<Origin> {
    let mut arena: SlotMap<ModelId, ()> = SlotMap::with_key();
    (0..n)
        .map(|i| Origin {
            id: arena.insert(()),
            rank: i as u64,
            tick,
        })
        .collect()
}

pub fn offer(origin: Origin, quantity: f64) -> Offer {
    Offer::new(origin, milk(), qty(quantity))
}

pub fn request(origin: Origin, quantity: f64, fill: f64, capacity: f64) -> Request {
    Request::new(origin, milk(), qty(quantity), qty(fill), qty(capacity))
}

// ===========================================================================
// Backends
// ===========================================================================

/// A backend whose every write fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingBackend;

impl Backend for FailingBackend {
    fn write_batch(&mut self, _records: &[Record]) -> Result<(), RecordError> {
        Err(RecordError::Io(std::io::Error::other("disk full")))
    }

    fn flush(&mut self) -> Result<(), RecordError> {
        Err(RecordError::Io(std::io::Error::other("disk full")))
    }
}
