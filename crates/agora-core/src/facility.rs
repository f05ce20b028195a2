//! Facilities: models that produce and/or consume a commodity every tick.
//!
//! Two built-in facilities ship with the engine. [`Source`] is rate-bound
//! (it offers the same quantity every tick and keeps no stock), and
//! [`Sink`] is capacity-bound (it requests up to its rate until its fill
//! level reaches capacity).

use crate::commodity::{Commodity, DEFAULT_QUALITY, Offer, Origin, Request, Transaction};
use crate::fixed::Quantity;
use crate::model::{
    Model, ModelError, ModelInfo, Params, TypeTag, check_keys, param_quantity, param_text,
    param_u64,
};

/// Plugin name of [`Source`].
pub const SOURCE_IMPL: &str = "Source";
/// Plugin name of [`Sink`].
pub const SINK_IMPL: &str = "Sink";

// ---------------------------------------------------------------------------
// Facility trait
// ---------------------------------------------------------------------------

/// The trading capability of a model.
pub trait Facility {
    fn commodity(&self) -> &Commodity;

    /// Supply offered this tick, if any.
    fn produce(&self, origin: &Origin) -> Option<Offer> {
        let _ = origin;
        None
    }

    /// Demand requested this tick, if any.
    fn consume(&self, origin: &Origin) -> Option<Request> {
        let _ = origin;
        None
    }

    /// Called for every cleared transaction this facility sent.
    fn on_shipped(&mut self, txn: &Transaction) {
        let _ = txn;
    }

    /// Called for every cleared transaction this facility received.
    fn on_received(&mut self, txn: &Transaction) {
        let _ = txn;
    }

    /// Current fill level for capacity-bound facilities.
    fn fill_level(&self) -> Option<Quantity> {
        None
    }
}

/// Apply the commodity keys shared by both built-in facilities.
fn configure_commodity(
    model: &str,
    commodity: &mut Commodity,
    params: &Params,
) -> Result<(), ModelError> {
    if let Some(name) = param_text(model, params, "commodity")? {
        commodity.name = name.to_string();
    }
    if let Some(quality) = param_text(model, params, "quality")? {
        commodity.quality = quality.to_string();
    }
    if let Some(units) = param_text(model, params, "units")? {
        commodity.unit = units.to_string();
    }
    Ok(())
}

fn unconfigured_commodity() -> Commodity {
    Commodity {
        name: String::new(),
        quality: DEFAULT_QUALITY.to_string(),
        unit: String::new(),
    }
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// Offers `rate` units of its commodity every active tick. With a finite
/// `inventory` it stops offering once that much has been shipped.
#[derive(Debug, Clone)]
pub struct Source {
    info: ModelInfo,
    commodity: Commodity,
    rate: Quantity,
    inventory: Option<Quantity>,
    /// Runtime: total shipped since deployment.
    shipped: Quantity,
}

impl Source {
    pub fn new(name: &str, commodity: Commodity, rate: Quantity) -> Self {
        Self {
            info: ModelInfo::new(name, SOURCE_IMPL, TypeTag::Facility),
            commodity,
            rate,
            inventory: None,
            shipped: Quantity::ZERO,
        }
    }

    /// A source with a zero rate and no commodity, as produced by the plugin
    /// registry before configuration.
    pub fn unconfigured() -> Self {
        Self::new("", unconfigured_commodity(), Quantity::ZERO)
    }

    pub fn with_inventory(mut self, total: Quantity) -> Self {
        self.inventory = Some(total);
        self
    }

    pub fn with_lifetime(mut self, ticks: u64) -> Self {
        self.info.lifetime = Some(ticks);
        self
    }

    pub fn rate(&self) -> Quantity {
        self.rate
    }

    pub fn set_rate(&mut self, rate: Quantity) {
        self.rate = rate;
    }

    pub fn shipped(&self) -> Quantity {
        self.shipped
    }

    /// Stock left to ship, or `None` for an inexhaustible source.
    pub fn remaining(&self) -> Option<Quantity> {
        self.inventory
            .map(|total| (total - self.shipped).max(Quantity::ZERO))
    }
}

impl Model for Source {
    fn info(&self) -> &ModelInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut ModelInfo {
        &mut self.info
    }

    fn configure(&mut self, params: &Params) -> Result<(), ModelError> {
        let name = self.info.name.clone();
        check_keys(
            &name,
            params,
            &["rate", "commodity", "quality", "units", "inventory", "lifetime"],
        )?;
        if let Some(rate) = param_quantity(&name, params, "rate")? {
            self.rate = rate;
        }
        if let Some(total) = param_quantity(&name, params, "inventory")? {
            self.inventory = Some(total);
        }
        if let Some(lifetime) = param_u64(&name, params, "lifetime")? {
            self.info.lifetime = Some(lifetime);
        }
        configure_commodity(&name, &mut self.commodity, params)
    }

    fn spawn(&self) -> Box<dyn Model> {
        Box::new(Self {
            info: self.info.template(),
            commodity: self.commodity.clone(),
            rate: self.rate,
            inventory: self.inventory,
            shipped: Quantity::ZERO,
        })
    }

    fn as_facility(&self) -> Option<&dyn Facility> {
        Some(self)
    }

    fn as_facility_mut(&mut self) -> Option<&mut dyn Facility> {
        Some(self)
    }
}

impl Facility for Source {
    fn commodity(&self) -> &Commodity {
        &self.commodity
    }

    fn produce(&self, origin: &Origin) -> Option<Offer> {
        let available = match self.remaining() {
            Some(left) => self.rate.min(left),
            None => self.rate,
        };
        (available > Quantity::ZERO).then(|| Offer::new(*origin, self.commodity.clone(), available))
    }

    fn on_shipped(&mut self, txn: &Transaction) {
        self.shipped = self.shipped.saturating_add(txn.quantity);
    }
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

/// Requests up to `rate` units per tick until `capacity` is filled.
#[derive(Debug, Clone)]
pub struct Sink {
    info: ModelInfo,
    commodity: Commodity,
    rate: Quantity,
    capacity: Quantity,
    /// Runtime: total received since deployment.
    fill: Quantity,
}

impl Sink {
    pub fn new(name: &str, commodity: Commodity, rate: Quantity, capacity: Quantity) -> Self {
        Self {
            info: ModelInfo::new(name, SINK_IMPL, TypeTag::Facility),
            commodity,
            rate,
            capacity,
            fill: Quantity::ZERO,
        }
    }

    pub fn unconfigured() -> Self {
        Self::new("", unconfigured_commodity(), Quantity::ZERO, Quantity::ZERO)
    }

    pub fn with_lifetime(mut self, ticks: u64) -> Self {
        self.info.lifetime = Some(ticks);
        self
    }

    pub fn rate(&self) -> Quantity {
        self.rate
    }

    pub fn capacity(&self) -> Quantity {
        self.capacity
    }

    pub fn set_rate(&mut self, rate: Quantity) {
        self.rate = rate;
    }

    pub fn set_capacity(&mut self, capacity: Quantity) {
        self.capacity = capacity;
    }
}

impl Model for Sink {
    fn info(&self) -> &ModelInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut ModelInfo {
        &mut self.info
    }

    fn configure(&mut self, params: &Params) -> Result<(), ModelError> {
        let name = self.info.name.clone();
        check_keys(
            &name,
            params,
            &["rate", "capacity", "commodity", "quality", "units", "lifetime"],
        )?;
        if let Some(rate) = param_quantity(&name, params, "rate")? {
            self.rate = rate;
        }
        if let Some(capacity) = param_quantity(&name, params, "capacity")? {
            self.capacity = capacity;
        }
        if let Some(lifetime) = param_u64(&name, params, "lifetime")? {
            self.info.lifetime = Some(lifetime);
        }
        configure_commodity(&name, &mut self.commodity, params)
    }

    fn spawn(&self) -> Box<dyn Model> {
        Box::new(Self {
            info: self.info.template(),
            commodity: self.commodity.clone(),
            rate: self.rate,
            capacity: self.capacity,
            fill: Quantity::ZERO,
        })
    }

    fn as_facility(&self) -> Option<&dyn Facility> {
        Some(self)
    }

    fn as_facility_mut(&mut self) -> Option<&mut dyn Facility> {
        Some(self)
    }
}

impl Facility for Sink {
    fn commodity(&self) -> &Commodity {
        &self.commodity
    }

    fn consume(&self, origin: &Origin) -> Option<Request> {
        let unmet = (self.capacity - self.fill).max(Quantity::ZERO);
        let wanted = self.rate.min(unmet);
        (wanted > Quantity::ZERO).then(|| {
            Request::new(
                *origin,
                self.commodity.clone(),
                wanted,
                self.fill,
                self.capacity,
            )
        })
    }

    fn on_received(&mut self, txn: &Transaction) {
        self.fill = self.fill.saturating_add(txn.quantity);
    }

    fn fill_level(&self) -> Option<Quantity> {
        Some(self.fill)
    }
}
