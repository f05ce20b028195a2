//! Commodities and the per-tick trade vocabulary: offers, requests and the
//! transactions a market clears them into.

use crate::fixed::{Quantity, Tick};
use crate::id::ModelId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Quality tag used when a facility does not configure one.
pub const DEFAULT_QUALITY: &str = "standard";

// ---------------------------------------------------------------------------
// Commodity
// ---------------------------------------------------------------------------

/// A resource kind. An offer and a request are compatible only when name,
/// quality and unit all agree, which is exactly structural equality.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Commodity {
    pub name: String,
    pub quality: String,
    pub unit: String,
}

impl Commodity {
    /// A commodity with the default quality tag.
    pub fn new(name: &str, unit: &str) -> Self {
        Self {
            name: name.to_string(),
            quality: DEFAULT_QUALITY.to_string(),
            unit: unit.to_string(),
        }
    }

    pub fn with_quality(mut self, quality: &str) -> Self {
        self.quality = quality.to_string();
        self
    }

    pub fn is_compatible(&self, other: &Commodity) -> bool {
        self == other
    }
}

impl fmt::Display for Commodity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}] ({})", self.name, self.quality, self.unit)
    }
}

// ---------------------------------------------------------------------------
// Origin
// ---------------------------------------------------------------------------

/// Who is trading and when. Handed to facilities by the context so that the
/// offers and requests they build carry their identity and activation rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Origin {
    pub id: ModelId,
    /// Activation rank; lower ranks were registered earlier.
    pub rank: u64,
    pub tick: Tick,
}

// ---------------------------------------------------------------------------
// Offer / Request
// ---------------------------------------------------------------------------

/// A producer's declared supply for one tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    pub sender: ModelId,
    pub rank: u64,
    pub commodity: Commodity,
    pub quantity: Quantity,
    pub tick: Tick,
}

impl Offer {
    pub fn new(origin: Origin, commodity: Commodity, quantity: Quantity) -> Self {
        Self {
            sender: origin.id,
            rank: origin.rank,
            commodity,
            quantity,
            tick: origin.tick,
        }
    }
}

/// A consumer's declared demand for one tick, together with its fill level
/// so the market can prioritize by unmet capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub receiver: ModelId,
    pub rank: u64,
    pub commodity: Commodity,
    /// Quantity wanted this tick.
    pub quantity: Quantity,
    pub fill: Quantity,
    pub capacity: Quantity,
    pub tick: Tick,
}

impl Request {
    pub fn new(
        origin: Origin,
        commodity: Commodity,
        quantity: Quantity,
        fill: Quantity,
        capacity: Quantity,
    ) -> Self {
        Self {
            receiver: origin.id,
            rank: origin.rank,
            commodity,
            quantity,
            fill,
            capacity,
            tick: origin.tick,
        }
    }

    /// Capacity not yet filled. Never negative.
    pub fn unmet(&self) -> Quantity {
        (self.capacity - self.fill).max(Quantity::ZERO)
    }

    /// The most this request can absorb this tick.
    pub fn acceptable(&self) -> Quantity {
        self.quantity.min(self.unmet()).max(Quantity::ZERO)
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// A cleared trade. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub tick: Tick,
    pub sender: ModelId,
    pub receiver: ModelId,
    pub commodity: Commodity,
    pub quantity: Quantity,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::qty;
    use slotmap::SlotMap;

    fn origin() -> Origin {
        let mut arena: SlotMap<ModelId, ()> = SlotMap::with_key();
        Origin {
            id: arena.insert(()),
            rank: 3,
            tick: 7,
        }
    }

    #[test]
    fn compatibility_requires_name_quality_and_unit() {
        let milk = Commodity::new("milk", "kg");
        assert!(milk.is_compatible(&Commodity::new("milk", "kg")));
        assert!(!milk.is_compatible(&Commodity::new("milk", "l")));
        assert!(!milk.is_compatible(&Commodity::new("milk", "kg").with_quality("raw")));
        assert!(!milk.is_compatible(&Commodity::new("cream", "kg")));
    }

    #[test]
    fn default_quality_is_standard() {
        assert_eq!(Commodity::new("milk", "kg").quality, DEFAULT_QUALITY);
    }

    #[test]
    fn offer_carries_origin() {
        let o = origin();
        let offer = Offer::new(o, Commodity::new("milk", "kg"), qty(100.0));
        assert_eq!(offer.sender, o.id);
        assert_eq!(offer.rank, 3);
        assert_eq!(offer.tick, 7);
    }

    #[test]
    fn request_unmet_and_acceptable() {
        let req = Request::new(
            origin(),
            Commodity::new("milk", "kg"),
            qty(50.0),
            qty(980.0),
            qty(1000.0),
        );
        assert_eq!(req.unmet(), qty(20.0));
        assert_eq!(req.acceptable(), qty(20.0));
    }

    #[test]
    fn overfilled_request_has_no_unmet_capacity() {
        let req = Request::new(
            origin(),
            Commodity::new("milk", "kg"),
            qty(50.0),
            qty(1200.0),
            qty(1000.0),
        );
        assert_eq!(req.unmet(), Quantity::ZERO);
        assert_eq!(req.acceptable(), Quantity::ZERO);
    }

    #[test]
    fn display_shows_all_parts() {
        let s = Commodity::new("milk", "kg").with_quality("raw").to_string();
        assert_eq!(s, "milk[raw] (kg)");
    }
}
