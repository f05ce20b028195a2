//! Prototype catalog: named, fully configured template models.
//!
//! The catalog is append-only during setup and sealed when the simulation
//! starts. Deploying clones a prototype's configuration into a fresh model;
//! runtime state is never copied.

use crate::model::Model;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("prototype '{0}' is already registered")]
    Duplicate(String),
    #[error("unknown prototype '{0}'")]
    Unknown(String),
    #[error("catalog is sealed; cannot register '{0}' after the simulation started")]
    Sealed(String),
}

#[derive(Debug, Default)]
pub struct PrototypeCatalog {
    prototypes: HashMap<String, Box<dyn Model>>,
    /// Registration order, for stable listing.
    order: Vec<String>,
    sealed: bool,
}

impl PrototypeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, prototype: Box<dyn Model>) -> Result<(), CatalogError> {
        if self.sealed {
            return Err(CatalogError::Sealed(name.to_string()));
        }
        if self.prototypes.contains_key(name) {
            return Err(CatalogError::Duplicate(name.to_string()));
        }
        self.prototypes.insert(name.to_string(), prototype);
        self.order.push(name.to_string());
        Ok(())
    }

    /// Clone the named prototype into a new model called `"{name} {serial}"`.
    pub fn deploy(&self, name: &str, serial: u64) -> Result<Box<dyn Model>, CatalogError> {
        let prototype = self
            .prototypes
            .get(name)
            .ok_or_else(|| CatalogError::Unknown(name.to_string()))?;
        let mut model = prototype.spawn();
        model.set_name(&format!("{name} {serial}"));
        Ok(model)
    }

    pub fn get(&self, name: &str) -> Option<&dyn Model> {
        self.prototypes.get(name).map(|m| m.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.prototypes.contains_key(name)
    }

    /// Prototype names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }
}
