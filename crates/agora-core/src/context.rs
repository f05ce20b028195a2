//! The simulation context: clock, active-model registry, and tick loop.
//!
//! A [`Context`] is constructed once per run and owns everything the run
//! needs: the configuration, the [`Timer`], the [`PrototypeCatalog`], the
//! arena of active models, and the [`EventRecorder`]. Nothing is global.
//!
//! # Tick pipeline
//!
//! Each call to [`Context::step`] runs five phases:
//!
//! 1. **Step** -- every active model's `step` hook, in activation order.
//!    Deployments a model requests are applied as soon as its step returns,
//!    so models deployed at tick `t` are stepped and trade at tick `t`.
//! 2. **Collect** -- every facility emits its offer and/or request.
//! 3. **Clear** -- each market clears the traffic for its commodity.
//! 4. **Settle** -- transactions are delivered, recorded, and hashed.
//! 5. **Bookkeeping** -- expired facilities are decommissioned and the
//!    clock advances.

use crate::builder::{Builder, ScheduleError};
use crate::catalog::{CatalogError, PrototypeCatalog};
use crate::commodity::{Offer, Origin, Request, Transaction};
use crate::facility::Facility;
use crate::fixed::Tick;
use crate::id::ModelId;
use crate::market::{ClearingViolation, MarketModel, audit};
use crate::model::{
    Model, ModelError, StepContext, expect_builder_mut, expect_facility, expect_market,
};
use crate::plugin::PluginError;
use crate::recorder::{Backend, EventRecorder, Record, StateChange};
use crate::sim::{RunSummary, SimConfig, StateHash, Timer};
use slotmap::SlotMap;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, trace, warn};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error(transparent)]
    Plugin(#[from] PluginError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("market produced an invalid clearing: {0}")]
    Clearing(#[from] ClearingViolation),
    #[error("a model named '{0}' is already active")]
    DuplicateName(String),
    #[error("no active model with id {0:?}")]
    UnknownModel(ModelId),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("simulation already finished at tick {tick}")]
    Finished { tick: Tick },
    #[error("tick {tick}, model '{model}': {source}")]
    Step {
        tick: Tick,
        model: String,
        #[source]
        source: Box<SimError>,
    },
}

impl SimError {
    fn at(tick: Tick, model: &str, source: impl Into<SimError>) -> Self {
        SimError::Step {
            tick,
            model: model.to_string(),
            source: Box::new(source.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-tick report
// ---------------------------------------------------------------------------

/// What happened during one [`Context::step`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tick: Tick,
    pub offers: usize,
    pub requests: usize,
    /// Transactions in clearing order.
    pub transactions: Vec<Transaction>,
    pub deployed: Vec<ModelId>,
    pub decommissioned: Vec<ModelId>,
    /// Offers and requests no market served.
    pub unrouted: usize,
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub(crate) struct ActiveModel {
    pub(crate) model: Box<dyn Model>,
    /// Activation rank; lower is earlier.
    pub(crate) rank: u64,
    /// Prototype this model was cloned from, if any.
    pub(crate) prototype: Option<String>,
}

#[derive(Debug)]
pub struct Context {
    config: SimConfig,
    timer: Timer,
    pub(crate) models: SlotMap<ModelId, ActiveModel>,
    /// Active models in activation order.
    pub(crate) activation: Vec<ModelId>,
    names: HashMap<String, ModelId>,
    next_rank: u64,
    catalog: PrototypeCatalog,
    /// Deployments made so far per prototype; drives instance naming.
    deploy_counters: HashMap<String, u64>,
    recorder: EventRecorder,
    history: StateHash,
    transactions: u64,
    deployments: u64,
    decommissions: u64,
    last_transactions: Vec<Transaction>,
    closed: bool,
}

impl Context {
    /// Create a context for one run. The backend receives every record the
    /// run produces.
    pub fn new(config: SimConfig, backend: Box<dyn Backend>) -> Result<Self, SimError> {
        if config.start < 0 {
            return Err(SimError::InvalidConfig(format!(
                "start tick {} is negative",
                config.start
            )));
        }
        if !config.decay.is_finite() {
            return Err(SimError::InvalidConfig(format!(
                "decay {} is not finite",
                config.decay
            )));
        }
        if config.recorder.batch_size == 0 {
            return Err(SimError::InvalidConfig(
                "recorder batch size must be at least 1".to_string(),
            ));
        }

        let mut recorder = EventRecorder::new(backend, &config.recorder);
        recorder.record(Record::StateChange(StateChange::SimulationStarted {
            tick: config.start,
            duration: config.duration,
            decay: config.decay,
        }));

        Ok(Self {
            timer: Timer::new(&config),
            config,
            models: SlotMap::with_key(),
            activation: Vec::new(),
            names: HashMap::new(),
            next_rank: 0,
            catalog: PrototypeCatalog::new(),
            deploy_counters: HashMap::new(),
            recorder,
            history: StateHash::new(),
            transactions: 0,
            deployments: 0,
            decommissions: 0,
            last_transactions: Vec::new(),
            closed: false,
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    pub fn current_tick(&self) -> Tick {
        self.timer.current()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    // -----------------------------------------------------------------------
    // Setup
    // -----------------------------------------------------------------------

    /// Register a fully configured template. Rejected once the run started.
    pub fn add_prototype(&mut self, name: &str, prototype: Box<dyn Model>) -> Result<(), SimError> {
        self.catalog.register(name, prototype)?;
        debug!(prototype = name, "prototype registered");
        Ok(())
    }

    pub fn catalog(&self) -> &PrototypeCatalog {
        &self.catalog
    }

    /// Activate a root-level model immediately, bypassing any schedule.
    pub fn deploy(&mut self, model: Box<dyn Model>) -> Result<ModelId, SimError> {
        self.activate(model, None, None)
    }

    /// Clone a prototype from the catalog and activate it as a child of
    /// `parent` (or as a root when `parent` is `None`).
    pub fn deploy_prototype(
        &mut self,
        prototype: &str,
        parent: Option<ModelId>,
    ) -> Result<ModelId, SimError> {
        if let Some(parent) = parent {
            if !self.models.contains_key(parent) {
                return Err(SimError::UnknownModel(parent));
            }
        }
        let serial = self.deploy_counters.get(prototype).copied().unwrap_or(0) + 1;
        let model = self.catalog.deploy(prototype, serial)?;
        let id = self.activate(model, parent, Some(prototype))?;
        self.deploy_counters.insert(prototype.to_string(), serial);
        Ok(id)
    }

    /// Append a schedule entry to an active builder. The prototype must
    /// already be in the catalog.
    pub fn schedule(&mut self, builder: ModelId, prototype: &str, tick: Tick) -> Result<(), SimError> {
        if !self.catalog.contains(prototype) {
            return Err(CatalogError::Unknown(prototype.to_string()).into());
        }
        self.builder_mut(builder)?.schedule(prototype, tick)?;
        Ok(())
    }

    fn activate(
        &mut self,
        mut model: Box<dyn Model>,
        parent: Option<ModelId>,
        prototype: Option<&str>,
    ) -> Result<ModelId, SimError> {
        if self.closed {
            return Err(SimError::Finished {
                tick: self.timer.current(),
            });
        }
        let name = model.name().to_string();
        if self.names.contains_key(&name) {
            return Err(SimError::DuplicateName(name));
        }
        let tick = self.timer.current();
        {
            let info = model.info_mut();
            info.parent = parent;
            info.deployed_at = Some(tick);
        }
        if let Some(market) = model.as_market() {
            let commodity = market.commodity();
            if let Some(existing) = self.market_for(commodity) {
                warn!(
                    market = %name,
                    existing = %existing,
                    commodity,
                    "commodity already has a market; the earlier one keeps clearing it"
                );
            }
        }

        let rank = self.next_rank;
        self.next_rank += 1;
        let impl_id = model.info().impl_id.clone();
        let id = self.models.insert(ActiveModel {
            model,
            rank,
            prototype: prototype.map(str::to_string),
        });
        self.activation.push(id);
        self.names.insert(name.clone(), id);
        self.deployments += 1;

        self.history.write_str("deploy");
        self.history.write_i64(tick);
        self.history.write_str(&name);

        let parent_name = parent.and_then(|p| self.model_name(p)).map(str::to_string);
        debug!(
            tick,
            model = %name,
            implementation = %impl_id,
            parent = ?parent_name,
            "model deployed"
        );
        self.recorder
            .record(Record::StateChange(StateChange::Deployed {
                tick,
                model: id,
                name,
                impl_id,
                prototype: prototype.map(str::to_string),
                parent,
            }));
        Ok(id)
    }

    fn market_for(&self, commodity: &str) -> Option<&str> {
        self.activation.iter().find_map(|&id| {
            let active = self.models.get(id)?;
            let market = active.model.as_market()?;
            (market.commodity() == commodity).then(|| active.model.name())
        })
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    pub fn model(&self, id: ModelId) -> Result<&dyn Model, SimError> {
        self.models
            .get(id)
            .map(|a| a.model.as_ref())
            .ok_or(SimError::UnknownModel(id))
    }

    pub fn model_mut(&mut self, id: ModelId) -> Result<&mut dyn Model, SimError> {
        match self.models.get_mut(id) {
            Some(active) => Ok(active.model.as_mut()),
            None => Err(SimError::UnknownModel(id)),
        }
    }

    /// Narrow an active model to a facility.
    pub fn facility(&self, id: ModelId) -> Result<&dyn Facility, SimError> {
        Ok(expect_facility(self.model(id)?)?)
    }

    /// Narrow an active model to a market.
    pub fn market(&self, id: ModelId) -> Result<&dyn MarketModel, SimError> {
        Ok(expect_market(self.model(id)?)?)
    }

    /// Narrow an active model to a builder.
    pub fn builder_mut(&mut self, id: ModelId) -> Result<&mut Builder, SimError> {
        Ok(expect_builder_mut(self.model_mut(id)?)?)
    }

    /// Find an active model by name.
    pub fn find(&self, name: &str) -> Option<ModelId> {
        self.names.get(name).copied()
    }

    pub fn model_name(&self, id: ModelId) -> Option<&str> {
        self.models.get(id).map(|a| a.model.name())
    }

    /// Prototype an active model was cloned from.
    pub fn prototype_of(&self, id: ModelId) -> Option<&str> {
        self.models.get(id).and_then(|a| a.prototype.as_deref())
    }

    /// Active models in activation order.
    pub fn active_ids(&self) -> &[ModelId] {
        &self.activation
    }

    pub fn active_count(&self) -> usize {
        self.activation.len()
    }

    /// Children deployed by `parent` that are still active.
    pub fn children_of(&self, parent: ModelId) -> Vec<ModelId> {
        self.activation
            .iter()
            .copied()
            .filter(|&id| {
                self.models
                    .get(id)
                    .is_some_and(|a| a.model.info().parent == Some(parent))
            })
            .collect()
    }

    /// Transactions cleared during the most recent tick.
    pub fn last_transactions(&self) -> &[Transaction] {
        &self.last_transactions
    }

    /// Digest of every deployment and transaction so far.
    pub fn history_hash(&self) -> u64 {
        self.history.finish()
    }

    pub fn recorder(&self) -> &EventRecorder {
        &self.recorder
    }

    // -----------------------------------------------------------------------
    // Running
    // -----------------------------------------------------------------------

    /// Ask the run to stop once the current tick completes.
    pub fn stop(&mut self) {
        self.timer.request_stop();
    }

    /// Run until the configured duration elapses or a stop is requested.
    /// The recorder is closed afterwards whether or not a step failed.
    pub fn run(&mut self) -> Result<RunSummary, SimError> {
        if self.closed {
            return Err(SimError::Finished {
                tick: self.timer.current(),
            });
        }
        info!(
            start = self.timer.start(),
            end = self.timer.end(),
            models = self.activation.len(),
            "simulation starting"
        );
        let result = self.run_ticks();
        if let Err(e) = &result {
            warn!(error = %e, "simulation halted");
        }
        self.close();
        result?;
        let summary = self.summary();
        info!(
            ticks = summary.ticks_run,
            transactions = summary.transactions,
            deployments = summary.deployments,
            history_hash = summary.history_hash,
            "simulation finished"
        );
        Ok(summary)
    }

    fn run_ticks(&mut self) -> Result<(), SimError> {
        while !self.timer.is_finished() && !self.timer.stop_requested() {
            self.step()?;
        }
        Ok(())
    }

    /// Record the end of the run and flush the recorder. Idempotent; further
    /// steps fail with [`SimError::Finished`].
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.recorder
            .record(Record::StateChange(StateChange::SimulationEnded {
                tick: self.timer.current(),
                ticks_run: self.timer.elapsed(),
            }));
        self.recorder.close();
        self.closed = true;
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            start: self.timer.start(),
            end: self.timer.current(),
            ticks_run: self.timer.elapsed(),
            transactions: self.transactions,
            deployments: self.deployments,
            decommissions: self.decommissions,
            history_hash: self.history.finish(),
            history_incomplete: self.recorder.history_incomplete(),
            stopped_early: self.timer.current() < self.timer.end(),
        }
    }

    /// Advance the simulation by one tick.
    pub fn step(&mut self) -> Result<TickReport, SimError> {
        let tick = self.timer.current();
        if self.closed || self.timer.is_finished() {
            return Err(SimError::Finished { tick });
        }
        if !self.timer.has_started() {
            self.timer.mark_started();
            self.catalog.seal();
        }

        let mut report = TickReport {
            tick,
            ..TickReport::default()
        };

        // Phase 1: Step -- model hooks, with deployments applied in place.
        self.phase_step(tick, &mut report)?;

        // Phase 2: Collect -- offers and requests from facilities.
        let (offers, requests) = self.phase_collect(tick);
        report.offers = offers.len();
        report.requests = requests.len();

        // Phase 3: Clear -- one market per commodity name.
        let transactions = self.phase_clear(tick, &offers, &requests, &mut report)?;

        // Phase 4: Settle -- deliver, record, hash.
        self.phase_settle(&transactions);
        report.transactions = transactions.clone();
        self.last_transactions = transactions;

        // Phase 5: Bookkeeping -- lifetimes, then the clock.
        self.phase_bookkeeping(tick, &mut report);

        Ok(report)
    }

    fn phase_step(&mut self, tick: Tick, report: &mut TickReport) -> Result<(), SimError> {
        let mut i = 0;
        while i < self.activation.len() {
            let id = self.activation[i];
            i += 1;

            let mut deployments = Vec::new();
            let mut stop = false;
            let Some(active) = self.models.get_mut(id) else {
                continue;
            };
            let mut ctx = StepContext::new(tick, id, &self.config, &mut deployments, &mut stop);
            if let Err(e) = active.model.step(&mut ctx) {
                return Err(SimError::at(tick, active.model.name(), e));
            }

            if stop {
                debug!(tick, model = %active.model.name(), "stop requested");
                self.timer.request_stop();
            }
            for prototype in deployments {
                match self.deploy_prototype(&prototype, Some(id)) {
                    Ok(child) => report.deployed.push(child),
                    Err(e) => {
                        let name = self.model_name(id).unwrap_or_default().to_string();
                        return Err(SimError::at(tick, &name, e));
                    }
                }
            }
        }
        Ok(())
    }

    fn phase_collect(&self, tick: Tick) -> (Vec<Offer>, Vec<Request>) {
        let mut offers = Vec::new();
        let mut requests = Vec::new();
        for &id in &self.activation {
            let Some(active) = self.models.get(id) else {
                continue;
            };
            let Some(facility) = active.model.as_facility() else {
                continue;
            };
            let origin = Origin {
                id,
                rank: active.rank,
                tick,
            };
            offers.extend(facility.produce(&origin));
            requests.extend(facility.consume(&origin));
        }
        (offers, requests)
    }

    fn phase_clear(
        &self,
        tick: Tick,
        offers: &[Offer],
        requests: &[Request],
        report: &mut TickReport,
    ) -> Result<Vec<Transaction>, SimError> {
        let mut served: HashSet<&str> = HashSet::new();
        let mut transactions = Vec::new();

        for &id in &self.activation {
            let Some(active) = self.models.get(id) else {
                continue;
            };
            let Some(market) = active.model.as_market() else {
                continue;
            };
            let commodity = market.commodity();
            if !served.insert(commodity) {
                continue;
            }
            let market_offers: Vec<Offer> = offers
                .iter()
                .filter(|o| o.commodity.name == commodity)
                .cloned()
                .collect();
            let market_requests: Vec<Request> = requests
                .iter()
                .filter(|r| r.commodity.name == commodity)
                .cloned()
                .collect();
            if market_offers.is_empty() && market_requests.is_empty() {
                continue;
            }
            let cleared = market.clear(&market_offers, &market_requests, tick);
            audit(&market_offers, &market_requests, &cleared)
                .map_err(|v| SimError::at(tick, active.model.name(), v))?;
            transactions.extend(cleared);
        }

        let unrouted = offers
            .iter()
            .map(|o| o.commodity.name.as_str())
            .chain(requests.iter().map(|r| r.commodity.name.as_str()))
            .filter(|name| !served.contains(name))
            .count();
        if unrouted > 0 {
            debug!(tick, unrouted, "offers/requests with no market dropped");
        }
        report.unrouted = unrouted;
        Ok(transactions)
    }

    fn phase_settle(&mut self, transactions: &[Transaction]) {
        for txn in transactions {
            if let Some(sender) = self
                .models
                .get_mut(txn.sender)
                .and_then(|a| a.model.as_facility_mut())
            {
                sender.on_shipped(txn);
            }
            if let Some(receiver) = self
                .models
                .get_mut(txn.receiver)
                .and_then(|a| a.model.as_facility_mut())
            {
                receiver.on_received(txn);
            }

            let sender = self.models.get(txn.sender).map_or("", |a| a.model.name());
            let receiver = self.models.get(txn.receiver).map_or("", |a| a.model.name());
            trace!(
                tick = txn.tick,
                sender,
                receiver,
                commodity = %txn.commodity,
                quantity = %txn.quantity,
                "transaction"
            );
            self.history.write_str("txn");
            self.history.write_i64(txn.tick);
            self.history.write_str(sender);
            self.history.write_str(receiver);
            self.history.write_str(&txn.commodity.to_string());
            self.history.write_quantity(txn.quantity);

            self.recorder.record(Record::Transaction(txn.clone()));
            self.transactions += 1;
        }
    }

    fn phase_bookkeeping(&mut self, tick: Tick, report: &mut TickReport) {
        let expired: Vec<ModelId> = self
            .activation
            .iter()
            .copied()
            .filter(|&id| {
                self.models
                    .get(id)
                    .is_some_and(|a| a.model.info().expires_after(tick))
            })
            .collect();

        for id in expired {
            let Some(active) = self.models.remove(id) else {
                continue;
            };
            let name = active.model.name().to_string();
            self.activation.retain(|&a| a != id);
            self.names.remove(&name);
            self.decommissions += 1;
            debug!(tick, model = %name, "model decommissioned");
            self.recorder
                .record(Record::StateChange(StateChange::Decommissioned {
                    tick,
                    model: id,
                    name,
                }));
            report.decommissioned.push(id);
        }

        self.timer.advance();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commodity::Commodity;
    use crate::fixed::qty;
    use crate::market::CommodityMarket;
    use crate::model::{Capability, ModelInfo, Params, TypeTag};
    use crate::recorder::{MemoryBackend, NullBackend};
    use crate::test_utils::*;

    fn context(duration: u64) -> Context {
        Context::new(SimConfig::new(0, duration, 0.0), Box::new(NullBackend)).unwrap()
    }

    #[test]
    fn rejects_negative_start() {
        let err = Context::new(SimConfig::new(-1, 10, 0.0), Box::new(NullBackend)).unwrap_err();
        assert!(matches!(err, SimError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_zero_batch_size() {
        let config = SimConfig::new(0, 10, 0.0)
            .with_recorder(crate::recorder::RecorderConfig { batch_size: 0 });
        let err = Context::new(config, Box::new(NullBackend)).unwrap_err();
        assert!(matches!(err, SimError::InvalidConfig(_)));
    }

    #[test]
    fn root_deploy_has_no_parent() {
        let mut ctx = context(5);
        let id = ctx.deploy(Box::new(make_source("farm", 100.0))).unwrap();
        let info = ctx.model(id).unwrap().info();
        assert_eq!(info.parent, None);
        assert_eq!(info.deployed_at, Some(0));
        assert_eq!(ctx.find("farm"), Some(id));
    }

    #[test]
    fn duplicate_active_name_rejected() {
        let mut ctx = context(5);
        ctx.deploy(Box::new(make_source("farm", 100.0))).unwrap();
        let err = ctx.deploy(Box::new(make_source("farm", 10.0))).unwrap_err();
        assert!(matches!(err, SimError::DuplicateName(n) if n == "farm"));
    }

    #[test]
    fn prototype_deploys_are_numbered() {
        let mut ctx = context(5);
        ctx.add_prototype("incinerator", Box::new(make_sink("x", 50.0, 1000.0)))
            .unwrap();
        let a = ctx.deploy_prototype("incinerator", None).unwrap();
        let b = ctx.deploy_prototype("incinerator", None).unwrap();
        assert_eq!(ctx.model_name(a), Some("incinerator 1"));
        assert_eq!(ctx.model_name(b), Some("incinerator 2"));
        assert_eq!(ctx.prototype_of(b), Some("incinerator"));
    }

    #[test]
    fn unknown_prototype_rejected() {
        let mut ctx = context(5);
        let err = ctx.deploy_prototype("nope", None).unwrap_err();
        assert!(matches!(err, SimError::Catalog(CatalogError::Unknown(_))));
    }

    #[test]
    fn catalog_sealed_after_first_step() {
        let mut ctx = context(5);
        ctx.step().unwrap();
        let err = ctx
            .add_prototype("late", Box::new(make_source("x", 1.0)))
            .unwrap_err();
        assert!(matches!(err, SimError::Catalog(CatalogError::Sealed(_))));
    }

    #[test]
    fn checked_narrowing_reports_type_mismatch() {
        let mut ctx = context(5);
        let farm = ctx.deploy(Box::new(make_source("farm", 100.0))).unwrap();
        let err = ctx.builder_mut(farm).unwrap_err();
        assert!(matches!(
            err,
            SimError::Model(ModelError::TypeMismatch {
                expected: Capability::Builder,
                ..
            })
        ));
        assert!(ctx.facility(farm).is_ok());
        assert!(ctx.market(farm).is_err());
    }

    #[test]
    fn schedule_requires_known_prototype() {
        let mut ctx = context(5);
        let b = ctx.deploy(Box::new(Builder::new("deployer"))).unwrap();
        let err = ctx.schedule(b, "ghost", 1).unwrap_err();
        assert!(matches!(err, SimError::Catalog(CatalogError::Unknown(_))));
    }

    #[test]
    fn schedule_rejects_negative_tick() {
        let mut ctx = context(5);
        ctx.add_prototype("farm", Box::new(make_source("x", 1.0)))
            .unwrap();
        let b = ctx.deploy(Box::new(Builder::new("deployer"))).unwrap();
        let err = ctx.schedule(b, "farm", -3).unwrap_err();
        assert!(matches!(
            err,
            SimError::Schedule(ScheduleError::InvalidTick { tick: -3, .. })
        ));
    }

    #[test]
    fn single_pair_trades_each_tick() {
        let mut ctx = context(3);
        let farm = ctx.deploy(Box::new(make_source("farm", 100.0))).unwrap();
        let sink = ctx.deploy(Box::new(make_sink("sink", 50.0, 1000.0))).unwrap();
        ctx.deploy(Box::new(CommodityMarket::new("market", "milk")))
            .unwrap();

        let report = ctx.step().unwrap();
        assert_eq!(report.tick, 0);
        assert_eq!(report.offers, 1);
        assert_eq!(report.requests, 1);
        assert_eq!(report.transactions.len(), 1);
        let txn = &report.transactions[0];
        assert_eq!(txn.sender, farm);
        assert_eq!(txn.receiver, sink);
        assert_eq!(txn.quantity, qty(50.0));
        assert_eq!(ctx.facility(sink).unwrap().fill_level(), Some(qty(50.0)));
        assert_eq!(ctx.current_tick(), 1);
    }

    #[test]
    fn builder_deploys_are_stepped_the_same_tick() {
        let mut ctx = dairy_context(&[("dairy farm", 0), ("milk incinerator", 2)], 5);
        let mut trades = Vec::new();
        for _ in 0..4 {
            let report = ctx.step().unwrap();
            trades.push((report.tick, report.deployed.len(), report.transactions.len()));
        }
        assert_eq!(trades, vec![(0, 1, 0), (1, 0, 0), (2, 1, 1), (3, 0, 1)]);
        let sink = ctx.find("milk incinerator 1").unwrap();
        let farm = ctx.find("dairy farm 1").unwrap();
        let builder = ctx.find("deployer").unwrap();
        assert_eq!(ctx.model(sink).unwrap().info().parent, Some(builder));
        assert_eq!(ctx.children_of(builder), vec![farm, sink]);
    }

    #[test]
    fn traffic_without_market_is_dropped() {
        let mut ctx = context(1);
        ctx.deploy(Box::new(make_source("farm", 100.0))).unwrap();
        ctx.deploy(Box::new(make_sink("sink", 50.0, 1000.0))).unwrap();
        let report = ctx.step().unwrap();
        assert!(report.transactions.is_empty());
        assert_eq!(report.unrouted, 2);
    }

    #[test]
    fn first_market_for_a_commodity_wins() {
        let mut ctx = context(1);
        ctx.deploy(Box::new(make_source("farm", 100.0))).unwrap();
        ctx.deploy(Box::new(make_sink("sink", 50.0, 1000.0))).unwrap();
        ctx.deploy(Box::new(CommodityMarket::new("first", "milk")))
            .unwrap();
        ctx.deploy(Box::new(CommodityMarket::new("second", "milk")))
            .unwrap();
        let report = ctx.step().unwrap();
        assert_eq!(report.transactions.len(), 1);
    }

    #[test]
    fn near_limit_rates_run_without_overflow() {
        let mut ctx = context(3);
        ctx.deploy(Box::new(make_source("farm", 2e9))).unwrap();
        let a = ctx.deploy(Box::new(make_sink("a", 2e9, 2e9))).unwrap();
        let b = ctx.deploy(Box::new(make_sink("b", 2e9, 2e9))).unwrap();
        ctx.deploy(Box::new(CommodityMarket::new("market", "milk")))
            .unwrap();

        ctx.run().unwrap();
        assert_eq!(ctx.facility(a).unwrap().fill_level(), Some(qty(2e9)));
        assert_eq!(ctx.facility(b).unwrap().fill_level(), Some(qty(2e9)));
        assert_eq!(ctx.summary().transactions, 2);
    }

    #[test]
    fn lifetime_decommissions_after_last_tick() {
        let mut ctx = context(5);
        let farm = ctx
            .deploy(Box::new(make_source("farm", 10.0).with_lifetime(2)))
            .unwrap();
        assert!(ctx.step().unwrap().decommissioned.is_empty());
        let report = ctx.step().unwrap();
        assert_eq!(report.decommissioned, vec![farm]);
        assert!(ctx.model(farm).is_err());
        assert_eq!(ctx.find("farm"), None);
        assert_eq!(ctx.summary().decommissions, 1);
    }

    #[test]
    fn step_after_finish_fails() {
        let mut ctx = context(2);
        ctx.run().unwrap();
        assert!(matches!(ctx.step(), Err(SimError::Finished { tick: 2 })));
        assert!(matches!(ctx.run(), Err(SimError::Finished { .. })));
    }

    #[test]
    fn stop_ends_run_early() {
        let mut ctx = context(10);
        ctx.step().unwrap();
        ctx.stop();
        let summary = ctx.run().unwrap();
        assert_eq!(summary.ticks_run, 1);
        assert!(summary.stopped_early);
    }

    #[test]
    fn model_can_request_stop() {
        let mut ctx = context(10);
        ctx.deploy(Box::new(StopAt {
            info: ModelInfo::new("stopper", "StopAt", TypeTag::Facility),
            at: 3,
        }))
        .unwrap();
        let summary = ctx.run().unwrap();
        assert_eq!(summary.ticks_run, 4);
        assert_eq!(summary.end, 4);
    }

    #[test]
    fn failing_step_reports_tick_and_model() {
        let mut ctx = context(10);
        ctx.deploy(Box::new(FailAt {
            info: ModelInfo::new("broken", "FailAt", TypeTag::Facility),
            at: 2,
        }))
        .unwrap();
        let err = ctx.run().unwrap_err();
        match err {
            SimError::Step { tick, model, source } => {
                assert_eq!(tick, 2);
                assert_eq!(model, "broken");
                assert!(matches!(*source, SimError::Model(ModelError::Failed(_))));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(ctx.is_closed());
        assert!(ctx.recorder().is_closed());
    }

    #[test]
    fn run_records_lifecycle() {
        let backend = MemoryBackend::new();
        let mut ctx =
            Context::new(SimConfig::new(0, 2, 0.0), Box::new(backend.clone())).unwrap();
        ctx.deploy(Box::new(make_source("farm", 100.0))).unwrap();
        ctx.run().unwrap();
        let changes = backend.state_changes();
        assert!(matches!(
            changes.first(),
            Some(StateChange::SimulationStarted { tick: 0, duration: 2, .. })
        ));
        assert!(matches!(changes[1], StateChange::Deployed { ref name, .. } if name == "farm"));
        assert!(matches!(
            changes.last(),
            Some(StateChange::SimulationEnded { tick: 2, ticks_run: 2 })
        ));
    }

    #[test]
    fn recording_failure_flags_history() {
        let mut ctx = Context::new(
            SimConfig::new(0, 3, 0.0).with_recorder(crate::recorder::RecorderConfig {
                batch_size: 1,
            }),
            Box::new(FailingBackend),
        )
        .unwrap();
        ctx.deploy(Box::new(make_source("farm", 100.0))).unwrap();
        ctx.deploy(Box::new(make_sink("sink", 50.0, 1000.0))).unwrap();
        ctx.deploy(Box::new(CommodityMarket::new("market", "milk")))
            .unwrap();
        let summary = ctx.run().unwrap();
        assert_eq!(summary.ticks_run, 3);
        assert_eq!(summary.transactions, 3);
        assert!(summary.history_incomplete);
    }

    #[test]
    fn misbehaving_market_is_fatal() {
        let mut ctx = context(2);
        ctx.deploy(Box::new(make_source("farm", 10.0))).unwrap();
        ctx.deploy(Box::new(make_sink("sink", 50.0, 1000.0))).unwrap();
        ctx.deploy(Box::new(Overpay {
            info: ModelInfo::new("greedy", "Overpay", TypeTag::Market),
        }))
        .unwrap();
        let err = ctx.step().unwrap_err();
        assert!(matches!(
            err,
            SimError::Step { ref model, ref source, .. }
                if model == "greedy" && matches!(**source, SimError::Clearing(_))
        ));
    }

    // -- Test models --

    #[derive(Debug, Clone)]
    struct StopAt {
        info: ModelInfo,
        at: Tick,
    }

    impl Model for StopAt {
        fn info(&self) -> &ModelInfo {
            &self.info
        }
        fn info_mut(&mut self) -> &mut ModelInfo {
            &mut self.info
        }
        fn configure(&mut self, _params: &Params) -> Result<(), ModelError> {
            Ok(())
        }
        fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<(), ModelError> {
            if ctx.tick == self.at {
                ctx.request_stop();
            }
            Ok(())
        }
        fn spawn(&self) -> Box<dyn Model> {
            Box::new(self.clone())
        }
    }

    #[derive(Debug, Clone)]
    struct FailAt {
        info: ModelInfo,
        at: Tick,
    }

    impl Model for FailAt {
        fn info(&self) -> &ModelInfo {
            &self.info
        }
        fn info_mut(&mut self) -> &mut ModelInfo {
            &mut self.info
        }
        fn configure(&mut self, _params: &Params) -> Result<(), ModelError> {
            Ok(())
        }
        fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<(), ModelError> {
            if ctx.tick == self.at {
                return Err(ModelError::Failed("boiler exploded".to_string()));
            }
            Ok(())
        }
        fn spawn(&self) -> Box<dyn Model> {
            Box::new(self.clone())
        }
    }

    /// Ships every request in full, regardless of supply.
    #[derive(Debug, Clone)]
    struct Overpay {
        info: ModelInfo,
    }

    impl Model for Overpay {
        fn info(&self) -> &ModelInfo {
            &self.info
        }
        fn info_mut(&mut self) -> &mut ModelInfo {
            &mut self.info
        }
        fn configure(&mut self, _params: &Params) -> Result<(), ModelError> {
            Ok(())
        }
        fn spawn(&self) -> Box<dyn Model> {
            Box::new(self.clone())
        }
        fn as_market(&self) -> Option<&dyn MarketModel> {
            Some(self)
        }
    }

    impl MarketModel for Overpay {
        fn commodity(&self) -> &str {
            "milk"
        }
        fn clear(&self, offers: &[Offer], requests: &[Request], tick: Tick) -> Vec<Transaction> {
            let Some(offer) = offers.first() else {
                return Vec::new();
            };
            requests
                .iter()
                .map(|r| Transaction {
                    tick,
                    sender: offer.sender,
                    receiver: r.receiver,
                    commodity: Commodity::new("milk", "kg"),
                    quantity: r.quantity,
                })
                .collect()
        }
    }
}
