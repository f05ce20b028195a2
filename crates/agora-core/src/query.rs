//! Read-only views of the active models.
//!
//! Snapshots are owned copies; nothing in them borrows from the context.

use crate::context::Context;
use crate::fixed::{Quantity, Tick};
use crate::id::ModelId;
use crate::model::TypeTag;

/// An aggregated, read-only view of one active model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSnapshot {
    pub id: ModelId,
    pub name: String,
    /// Plugin that produced the model.
    pub impl_id: String,
    pub type_tag: TypeTag,
    /// Prototype the model was cloned from, if any.
    pub prototype: Option<String>,
    /// Name of the deploying model. `None` for roots.
    pub parent: Option<String>,
    pub rank: u64,
    pub deployed_at: Option<Tick>,
    /// Current fill level for consuming facilities.
    pub fill_level: Option<Quantity>,
}

impl Context {
    /// One snapshot per active model, in activation order.
    pub fn snapshot_models(&self) -> Vec<ModelSnapshot> {
        self.activation
            .iter()
            .filter_map(|&id| self.snapshot_model(id))
            .collect()
    }

    pub fn snapshot_model(&self, id: ModelId) -> Option<ModelSnapshot> {
        let active = self.models.get(id)?;
        let info = active.model.info();
        Some(ModelSnapshot {
            id,
            name: info.name.clone(),
            impl_id: info.impl_id.clone(),
            type_tag: info.type_tag,
            prototype: active.prototype.clone(),
            parent: info
                .parent
                .and_then(|p| self.model_name(p))
                .map(str::to_string),
            rank: active.rank,
            deployed_at: info.deployed_at,
            fill_level: active.model.as_facility().and_then(|f| f.fill_level()),
        })
    }
}
