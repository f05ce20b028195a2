//! The polymorphic model abstraction.
//!
//! Every entity the context steps is a [`Model`]. Narrower capabilities
//! (facility, market, builder) are exposed through checked accessors that
//! return `None` when the instance does not implement them; callers that
//! require a capability go through [`expect_facility`] and friends, which
//! turn a missing capability into [`ModelError::TypeMismatch`].

use crate::builder::Builder;
use crate::facility::Facility;
use crate::fixed::{Quantity, Tick, checked_qty};
use crate::id::ModelId;
use crate::market::MarketModel;
use crate::sim::SimConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Type tag and capabilities
// ---------------------------------------------------------------------------

/// Coarse classification of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeTag {
    Facility,
    Market,
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeTag::Facility => write!(f, "Facility"),
            TypeTag::Market => write!(f, "Market"),
        }
    }
}

/// A narrower interface a caller may ask a model for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Facility,
    Market,
    Builder,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Facility => write!(f, "facility"),
            Capability::Market => write!(f, "market"),
            Capability::Builder => write!(f, "builder"),
        }
    }
}

// ---------------------------------------------------------------------------
// Model metadata
// ---------------------------------------------------------------------------

/// Identity and lifecycle metadata shared by every model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub name: String,
    /// Name of the plugin that produced this model.
    pub impl_id: String,
    pub type_tag: TypeTag,
    /// Back-reference to the model that deployed this one. Lookup only.
    pub parent: Option<ModelId>,
    /// Number of ticks the model stays active once deployed. `None` = forever.
    pub lifetime: Option<u64>,
    /// Tick at which the model became active.
    pub deployed_at: Option<Tick>,
}

impl ModelInfo {
    pub fn new(name: &str, impl_id: &str, type_tag: TypeTag) -> Self {
        Self {
            name: name.to_string(),
            impl_id: impl_id.to_string(),
            type_tag,
            parent: None,
            lifetime: None,
            deployed_at: None,
        }
    }

    /// Configuration-only copy: identity and lifetime survive, activation
    /// state does not.
    pub fn template(&self) -> Self {
        Self {
            parent: None,
            deployed_at: None,
            ..self.clone()
        }
    }

    /// Whether the model's lifetime has run out by the end of `tick`.
    pub fn expires_after(&self, tick: Tick) -> bool {
        match (self.lifetime, self.deployed_at) {
            (Some(lifetime), Some(at)) => {
                // A lifetime beyond the tick range never runs out.
                let Ok(lifetime) = Tick::try_from(lifetime) else {
                    return false;
                };
                // An age past Tick::MAX exceeds every representable lifetime.
                tick.saturating_sub(at)
                    .checked_add(1)
                    .is_none_or(|age| age >= lifetime)
            }
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// A configuration value handed to [`Model::configure`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

/// Named configuration values. Ordered so configuration is applied the same
/// way on every run.
pub type Params = BTreeMap<String, ParamValue>;

/// Build a [`Params`] map from `(key, value)` pairs.
pub fn params<I, K, V>(pairs: I) -> Params
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<ParamValue>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Reject any key not in `allowed`.
pub fn check_keys(model: &str, params: &Params, allowed: &[&str]) -> Result<(), ModelError> {
    match params.keys().find(|k| !allowed.contains(&k.as_str())) {
        Some(key) => Err(ModelError::UnknownParam {
            model: model.to_string(),
            key: key.clone(),
        }),
        None => Ok(()),
    }
}

fn invalid(model: &str, key: &str, reason: &str) -> ModelError {
    ModelError::InvalidParam {
        model: model.to_string(),
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

/// Read a non-negative quantity parameter.
pub fn param_quantity(
    model: &str,
    params: &Params,
    key: &str,
) -> Result<Option<Quantity>, ModelError> {
    let raw = match params.get(key) {
        None => return Ok(None),
        Some(ParamValue::Int(v)) => *v as f64,
        Some(ParamValue::Float(v)) => *v,
        Some(ParamValue::Text(_)) => return Err(invalid(model, key, "expected a number")),
    };
    if raw < 0.0 {
        return Err(invalid(model, key, "must not be negative"));
    }
    checked_qty(raw)
        .map(Some)
        .ok_or_else(|| invalid(model, key, "out of range"))
}

/// Read a non-negative integer parameter.
pub fn param_u64(model: &str, params: &Params, key: &str) -> Result<Option<u64>, ModelError> {
    match params.get(key) {
        None => Ok(None),
        Some(ParamValue::Int(v)) if *v >= 0 => Ok(Some(*v as u64)),
        Some(ParamValue::Int(_)) => Err(invalid(model, key, "must not be negative")),
        Some(_) => Err(invalid(model, key, "expected an integer")),
    }
}

/// Read a text parameter.
pub fn param_text<'a>(
    model: &str,
    params: &'a Params,
    key: &str,
) -> Result<Option<&'a str>, ModelError> {
    match params.get(key) {
        None => Ok(None),
        Some(ParamValue::Text(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(invalid(model, key, "expected text")),
    }
}

// ---------------------------------------------------------------------------
// Step context
// ---------------------------------------------------------------------------

/// What a model sees while it is being stepped.
///
/// Deployments requested here are queued and applied by the context as soon
/// as the requesting model's step returns, in request order.
#[derive(Debug)]
pub struct StepContext<'a> {
    pub tick: Tick,
    /// The model being stepped.
    pub model: ModelId,
    pub config: &'a SimConfig,
    deployments: &'a mut Vec<String>,
    stop: &'a mut bool,
}

impl<'a> StepContext<'a> {
    pub fn new(
        tick: Tick,
        model: ModelId,
        config: &'a SimConfig,
        deployments: &'a mut Vec<String>,
        stop: &'a mut bool,
    ) -> Self {
        Self {
            tick,
            model,
            config,
            deployments,
            stop,
        }
    }

    /// Queue a deployment of the named prototype, parented to this model.
    pub fn deploy(&mut self, prototype: &str) {
        self.deployments.push(prototype.to_string());
    }

    /// Ask the timer to stop once the current tick completes.
    pub fn request_stop(&mut self) {
        *self.stop = true;
    }
}

// ---------------------------------------------------------------------------
// Model trait
// ---------------------------------------------------------------------------

/// An entity stepped by the context once per tick.
pub trait Model: fmt::Debug {
    fn info(&self) -> &ModelInfo;

    fn info_mut(&mut self) -> &mut ModelInfo;

    fn name(&self) -> &str {
        &self.info().name
    }

    fn type_tag(&self) -> TypeTag {
        self.info().type_tag
    }

    fn set_name(&mut self, name: &str) {
        self.info_mut().name = name.to_string();
    }

    fn set_impl_id(&mut self, impl_id: &str) {
        self.info_mut().impl_id = impl_id.to_string();
    }

    fn set_type_tag(&mut self, tag: TypeTag) {
        self.info_mut().type_tag = tag;
    }

    /// Apply named configuration values. Unknown keys are rejected.
    fn configure(&mut self, params: &Params) -> Result<(), ModelError>;

    /// Per-tick hook. Runs to completion before the next model is stepped.
    fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<(), ModelError> {
        let _ = ctx;
        Ok(())
    }

    /// A fresh instance with this model's configuration and none of its
    /// runtime state.
    fn spawn(&self) -> Box<dyn Model>;

    fn as_facility(&self) -> Option<&dyn Facility> {
        None
    }

    fn as_facility_mut(&mut self) -> Option<&mut dyn Facility> {
        None
    }

    fn as_market(&self) -> Option<&dyn MarketModel> {
        None
    }

    fn as_builder(&self) -> Option<&Builder> {
        None
    }

    fn as_builder_mut(&mut self) -> Option<&mut Builder> {
        None
    }
}

fn mismatch(model: &dyn Model, expected: Capability) -> ModelError {
    ModelError::TypeMismatch {
        model: model.name().to_string(),
        expected,
    }
}

/// Narrow to a facility or fail with `TypeMismatch`.
pub fn expect_facility(model: &dyn Model) -> Result<&dyn Facility, ModelError> {
    model
        .as_facility()
        .ok_or_else(|| mismatch(model, Capability::Facility))
}

/// Narrow to a market or fail with `TypeMismatch`.
pub fn expect_market(model: &dyn Model) -> Result<&dyn MarketModel, ModelError> {
    model
        .as_market()
        .ok_or_else(|| mismatch(model, Capability::Market))
}

/// Narrow to a builder or fail with `TypeMismatch`.
pub fn expect_builder_mut(model: &mut dyn Model) -> Result<&mut Builder, ModelError> {
    let err = mismatch(model, Capability::Builder);
    model.as_builder_mut().ok_or(err)
}

// ---------------------------------------------------------------------------
// ModelError
// ---------------------------------------------------------------------------

/// Errors raised by models and by capability narrowing.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("model '{model}' is not a {expected}")]
    TypeMismatch { model: String, expected: Capability },
    #[error("model '{model}': invalid parameter '{key}': {reason}")]
    InvalidParam {
        model: String,
        key: String,
        reason: String,
    },
    #[error("model '{model}': unknown parameter '{key}'")]
    UnknownParam { model: String, key: String },
    #[error("{0}")]
    Failed(String),
}
