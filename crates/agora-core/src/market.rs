//! Market clearing.
//!
//! [`clear`] is a pure function of one tick's offers and requests:
//!
//! 1. Partition by commodity identity (name + quality + unit).
//! 2. Within a group, visit requests by descending unmet capacity, breaking
//!    ties by activation rank (earlier first).
//! 3. Each request draws from offers in producer activation order until the
//!    request or the offers are exhausted. Every nonzero draw becomes one
//!    [`Transaction`].
//!
//! Shortfalls are not carried over (the consumer re-requests next tick from
//! its new fill level) and unmatched supply is dropped for the tick.

use crate::commodity::{Commodity, Offer, Request, Transaction};
use crate::fixed::{Quantity, Tick};
use crate::id::ModelId;
use crate::model::{Model, ModelError, ModelInfo, Params, TypeTag, check_keys, param_text};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

/// Plugin name of [`CommodityMarket`].
pub const MARKET_IMPL: &str = "Market";

// ---------------------------------------------------------------------------
// MarketModel trait
// ---------------------------------------------------------------------------

/// The clearing capability of a model.
pub trait MarketModel {
    /// Commodity name this market serves. Every offer and request with this
    /// name is routed here; quality and unit are matched inside `clear`.
    fn commodity(&self) -> &str;

    fn clear(&self, offers: &[Offer], requests: &[Request], tick: Tick) -> Vec<Transaction>;
}

// ---------------------------------------------------------------------------
// Greedy clearing
// ---------------------------------------------------------------------------

/// Match offers against requests for one tick. See the module docs for the
/// ordering rules.
pub fn clear(offers: &[Offer], requests: &[Request], tick: Tick) -> Vec<Transaction> {
    let mut groups: BTreeMap<&Commodity, (Vec<&Offer>, Vec<&Request>)> = BTreeMap::new();
    for offer in offers.iter().filter(|o| o.quantity > Quantity::ZERO) {
        groups.entry(&offer.commodity).or_default().0.push(offer);
    }
    for request in requests.iter().filter(|r| r.acceptable() > Quantity::ZERO) {
        groups.entry(&request.commodity).or_default().1.push(request);
    }

    let mut transactions = Vec::new();
    for (commodity, (mut group_offers, mut group_requests)) in groups {
        if group_offers.is_empty() || group_requests.is_empty() {
            continue;
        }
        group_offers.sort_by_key(|o| o.rank);
        group_requests.sort_by_key(|r| (Reverse(r.unmet()), r.rank));

        let mut supply: Vec<Quantity> = group_offers.iter().map(|o| o.quantity).collect();
        let mut cursor = 0;

        for request in group_requests {
            let mut wanted = request.acceptable();
            while wanted > Quantity::ZERO && cursor < group_offers.len() {
                let moved = wanted.min(supply[cursor]);
                if moved > Quantity::ZERO {
                    transactions.push(Transaction {
                        tick,
                        sender: group_offers[cursor].sender,
                        receiver: request.receiver,
                        commodity: commodity.clone(),
                        quantity: moved,
                    });
                    supply[cursor] -= moved;
                    wanted -= moved;
                }
                if supply[cursor] == Quantity::ZERO {
                    cursor += 1;
                }
            }
            if cursor == group_offers.len() {
                break;
            }
        }
    }
    transactions
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

/// A way in which a set of transactions breaks the clearing contract.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClearingViolation {
    #[error("transaction for {commodity} has no matching offer from {sender:?}")]
    NoOffer { sender: ModelId, commodity: Commodity },
    #[error("transaction for {commodity} has no matching request from {receiver:?}")]
    NoRequest {
        receiver: ModelId,
        commodity: Commodity,
    },
    #[error("{sender:?} shipped {shipped} of {commodity} but offered {offered}")]
    OverShipped {
        sender: ModelId,
        commodity: Commodity,
        offered: Quantity,
        shipped: Quantity,
    },
    #[error("{receiver:?} received {received} of {commodity} but requested {requested}")]
    OverReceived {
        receiver: ModelId,
        commodity: Commodity,
        requested: Quantity,
        received: Quantity,
    },
    #[error("transaction quantity {0} is not positive")]
    NonPositive(Quantity),
}

/// Check that `transactions` never move more than was offered or requested,
/// per party and commodity. Used by the context to guard third-party markets.
pub fn audit(
    offers: &[Offer],
    requests: &[Request],
    transactions: &[Transaction],
) -> Result<(), ClearingViolation> {
    let mut offered: HashMap<(ModelId, &Commodity), Quantity> = HashMap::new();
    for o in offers {
        let total = offered.entry((o.sender, &o.commodity)).or_insert(Quantity::ZERO);
        *total = total.saturating_add(o.quantity);
    }
    let mut requested: HashMap<(ModelId, &Commodity), Quantity> = HashMap::new();
    for r in requests {
        let total = requested
            .entry((r.receiver, &r.commodity))
            .or_insert(Quantity::ZERO);
        *total = total.saturating_add(r.acceptable());
    }

    let mut shipped: HashMap<(ModelId, &Commodity), Quantity> = HashMap::new();
    let mut received: HashMap<(ModelId, &Commodity), Quantity> = HashMap::new();
    for t in transactions {
        if t.quantity <= Quantity::ZERO {
            return Err(ClearingViolation::NonPositive(t.quantity));
        }
        let out = shipped.entry((t.sender, &t.commodity)).or_insert(Quantity::ZERO);
        *out = out.saturating_add(t.quantity);
        let Some(&limit) = offered.get(&(t.sender, &t.commodity)) else {
            return Err(ClearingViolation::NoOffer {
                sender: t.sender,
                commodity: t.commodity.clone(),
            });
        };
        if *out > limit {
            return Err(ClearingViolation::OverShipped {
                sender: t.sender,
                commodity: t.commodity.clone(),
                offered: limit,
                shipped: *out,
            });
        }

        let inn = received.entry((t.receiver, &t.commodity)).or_insert(Quantity::ZERO);
        *inn = inn.saturating_add(t.quantity);
        let Some(&limit) = requested.get(&(t.receiver, &t.commodity)) else {
            return Err(ClearingViolation::NoRequest {
                receiver: t.receiver,
                commodity: t.commodity.clone(),
            });
        };
        if *inn > limit {
            return Err(ClearingViolation::OverReceived {
                receiver: t.receiver,
                commodity: t.commodity.clone(),
                requested: limit,
                received: *inn,
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// CommodityMarket
// ---------------------------------------------------------------------------

/// The built-in market: serves one commodity name with greedy clearing.
#[derive(Debug, Clone)]
pub struct CommodityMarket {
    info: ModelInfo,
    commodity: String,
}

impl CommodityMarket {
    pub fn new(name: &str, commodity: &str) -> Self {
        Self {
            info: ModelInfo::new(name, MARKET_IMPL, TypeTag::Market),
            commodity: commodity.to_string(),
        }
    }

    pub fn unconfigured() -> Self {
        Self::new("", "")
    }

    pub fn set_commodity(&mut self, commodity: &str) {
        self.commodity = commodity.to_string();
    }
}

impl Model for CommodityMarket {
    fn info(&self) -> &ModelInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut ModelInfo {
        &mut self.info
    }

    fn configure(&mut self, params: &Params) -> Result<(), ModelError> {
        let name = self.info.name.clone();
        check_keys(&name, params, &["commodity"])?;
        if let Some(commodity) = param_text(&name, params, "commodity")? {
            self.commodity = commodity.to_string();
        }
        Ok(())
    }

    fn spawn(&self) -> Box<dyn Model> {
        Box::new(Self {
            info: self.info.template(),
            commodity: self.commodity.clone(),
        })
    }

    fn as_market(&self) -> Option<&dyn MarketModel> {
        Some(self)
    }
}

impl MarketModel for CommodityMarket {
    fn commodity(&self) -> &str {
        &self.commodity
    }

    fn clear(&self, offers: &[Offer], requests: &[Request], tick: Tick) -> Vec<Transaction> {
        clear(offers, requests, tick)
    }
}
