//! The deployment scheduler.
//!
//! A [`Builder`] holds `(prototype, tick)` entries. Each entry moves
//! `Pending -> Fired` exactly once: on the builder's step at the entry's tick,
//! or on the builder's first step if the tick had already passed before the
//! builder became active. Entries fire in schedule-insertion order.

use crate::fixed::Tick;
use crate::model::{Model, ModelError, ModelInfo, Params, StepContext, TypeTag, check_keys};
use tracing::debug;

/// Plugin name of [`Builder`].
pub const BUILDER_IMPL: &str = "Builder";

/// Lifecycle of one schedule entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Pending,
    Fired { at: Tick },
}

/// A scheduled deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub prototype: String,
    pub tick: Tick,
    pub state: EntryState,
}

impl ScheduleEntry {
    pub fn is_pending(&self) -> bool {
        self.state == EntryState::Pending
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("cannot schedule '{prototype}' at negative tick {tick}")]
    InvalidTick { prototype: String, tick: Tick },
}

/// Deploys prototypes from the catalog on a fixed schedule.
#[derive(Debug, Clone)]
pub struct Builder {
    info: ModelInfo,
    schedule: Vec<ScheduleEntry>,
}

impl Builder {
    pub fn new(name: &str) -> Self {
        Self {
            info: ModelInfo::new(name, BUILDER_IMPL, TypeTag::Facility),
            schedule: Vec::new(),
        }
    }

    /// Append a pending entry.
    pub fn schedule(&mut self, prototype: &str, tick: Tick) -> Result<(), ScheduleError> {
        if tick < 0 {
            return Err(ScheduleError::InvalidTick {
                prototype: prototype.to_string(),
                tick,
            });
        }
        self.schedule.push(ScheduleEntry {
            prototype: prototype.to_string(),
            tick,
            state: EntryState::Pending,
        });
        Ok(())
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.schedule
    }

    pub fn pending_count(&self) -> usize {
        self.schedule.iter().filter(|e| e.is_pending()).count()
    }
}

impl Model for Builder {
    fn info(&self) -> &ModelInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut ModelInfo {
        &mut self.info
    }

    fn configure(&mut self, params: &Params) -> Result<(), ModelError> {
        check_keys(&self.info.name, params, &[])
    }

    /// Fire every pending entry whose tick is not in the future. Entries that
    /// were overdue when the builder became active are caught up here too.
    fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<(), ModelError> {
        for entry in self.schedule.iter_mut() {
            if entry.is_pending() && entry.tick <= ctx.tick {
                if entry.tick < ctx.tick {
                    debug!(
                        builder = %self.info.name,
                        prototype = %entry.prototype,
                        scheduled = entry.tick,
                        tick = ctx.tick,
                        "firing overdue schedule entry"
                    );
                }
                ctx.deploy(&entry.prototype);
                entry.state = EntryState::Fired { at: ctx.tick };
            }
        }
        Ok(())
    }

    /// The copy carries the whole schedule, reset to pending.
    fn spawn(&self) -> Box<dyn Model> {
        Box::new(Self {
            info: self.info.template(),
            schedule: self
                .schedule
                .iter()
                .map(|e| ScheduleEntry {
                    state: EntryState::Pending,
                    ..e.clone()
                })
                .collect(),
        })
    }

    fn as_builder(&self) -> Option<&Builder> {
        Some(self)
    }

    fn as_builder_mut(&mut self) -> Option<&mut Builder> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::ModelId;
    use crate::sim::SimConfig;
    use slotmap::SlotMap;

    /// Step `builder` at `tick` and return the prototypes it asked for.
    fn step_at(builder: &mut Builder, tick: Tick) -> Vec<String> {
        let mut arena: SlotMap<ModelId, ()> = SlotMap::with_key();
        let config = SimConfig::new(0, 100, 0.0);
        let mut queued = Vec::new();
        let mut stop = false;
        let mut ctx = StepContext::new(tick, arena.insert(()), &config, &mut queued, &mut stop);
        builder.step(&mut ctx).unwrap();
        queued
    }

    #[test]
    fn negative_tick_is_rejected() {
        let mut b = Builder::new("deployer");
        let err = b.schedule("farm", -1).unwrap_err();
        assert_eq!(
            err,
            ScheduleError::InvalidTick {
                prototype: "farm".to_string(),
                tick: -1,
            }
        );
        assert!(b.entries().is_empty());
    }

    #[test]
    fn fires_exactly_at_its_tick() {
        let mut b = Builder::new("deployer");
        b.schedule("farm", 2).unwrap();
        assert!(step_at(&mut b, 0).is_empty());
        assert!(step_at(&mut b, 1).is_empty());
        assert_eq!(step_at(&mut b, 2), vec!["farm"]);
        assert!(step_at(&mut b, 3).is_empty());
        assert_eq!(b.entries()[0].state, EntryState::Fired { at: 2 });
    }

    #[test]
    fn never_fires_twice() {
        let mut b = Builder::new("deployer");
        b.schedule("farm", 0).unwrap();
        assert_eq!(step_at(&mut b, 0).len(), 1);
        assert!(step_at(&mut b, 0).is_empty());
        assert_eq!(b.pending_count(), 0);
    }

    #[test]
    fn same_tick_entries_fire_in_insertion_order() {
        let mut b = Builder::new("deployer");
        b.schedule("sink", 0).unwrap();
        b.schedule("farm", 0).unwrap();
        b.schedule("sink", 0).unwrap();
        assert_eq!(step_at(&mut b, 0), vec!["sink", "farm", "sink"]);
    }

    #[test]
    fn overdue_entries_fire_on_first_step() {
        let mut b = Builder::new("deployer");
        b.schedule("farm", 1).unwrap();
        b.schedule("sink", 4).unwrap();
        b.schedule("late", 9).unwrap();
        assert_eq!(step_at(&mut b, 5), vec!["farm", "sink"]);
        assert_eq!(b.entries()[0].state, EntryState::Fired { at: 5 });
        assert_eq!(b.pending_count(), 1);
    }

    #[test]
    fn spawn_resets_schedule_to_pending() {
        let mut b = Builder::new("deployer");
        b.schedule("farm", 0).unwrap();
        step_at(&mut b, 0);
        let copy = b.spawn();
        let copy = copy.as_builder().unwrap();
        assert_eq!(copy.pending_count(), 1);
        assert_eq!(copy.entries()[0].prototype, "farm");
    }

    #[test]
    fn builder_rejects_params() {
        let mut b = Builder::new("deployer");
        assert!(b.configure(&Params::new()).is_ok());
        assert!(
            b.configure(&crate::model::params([("rate", 1_i64)]))
                .is_err()
        );
    }
}
