// src/catalog/mod.rs

//! Named action factories.
//!
//! Definition files refer to actions by name. An [`ActionCatalog`] turns a
//! name plus its parameters into a ready action for the matching phase.

pub mod builtin;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::operation::{ActionError, ExtractAction, LifecycleAction, LoadAction, TransformAction};

/// Reference to a catalog action: a bare name or `{ use, with }`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ActionRef {
    Name(String),
    Spec {
        #[serde(rename = "use")]
        name: String,
        #[serde(default)]
        with: Value,
    },
}

impl ActionRef {
    pub fn new(name: impl Into<String>) -> Self {
        ActionRef::Name(name.into())
    }

    pub fn with(name: impl Into<String>, params: Value) -> Self {
        ActionRef::Spec {
            name: name.into(),
            with: params,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ActionRef::Name(name) | ActionRef::Spec { name, .. } => name,
        }
    }

    /// Parameters, with "none" normalized to an empty object.
    pub fn params(&self) -> Value {
        match self {
            ActionRef::Spec { with, .. } if !with.is_null() => with.clone(),
            _ => Value::Object(Map::new()),
        }
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("unknown {kind} action '{name}'")]
    Unknown { kind: &'static str, name: String },

    #[error("invalid parameters for {kind} action '{name}': {source}")]
    InvalidParams {
        kind: &'static str,
        name: String,
        source: ActionError,
    },
}

/// Builds an action from its parameters.
pub type Factory<A> = Arc<dyn Fn(&Value) -> Result<Arc<A>, ActionError> + Send + Sync>;

struct FactoryMap<A: ?Sized> {
    kind: &'static str,
    factories: HashMap<String, Factory<A>>,
}

impl<A: ?Sized> FactoryMap<A> {
    fn new(kind: &'static str) -> Self {
        FactoryMap {
            kind,
            factories: HashMap::new(),
        }
    }

    fn insert(&mut self, name: &str, factory: Factory<A>) {
        self.factories.insert(name.to_string(), factory);
    }

    fn resolve(&self, action: &ActionRef) -> Result<Arc<A>, CatalogError> {
        let factory = self
            .factories
            .get(action.name())
            .ok_or_else(|| CatalogError::Unknown {
                kind: self.kind,
                name: action.name().to_string(),
            })?;
        factory(&action.params()).map_err(|source| CatalogError::InvalidParams {
            kind: self.kind,
            name: action.name().to_string(),
            source,
        })
    }

    fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Registry of action factories, one namespace per phase kind.
pub struct ActionCatalog {
    lifecycle: FactoryMap<dyn LifecycleAction>,
    extract: FactoryMap<dyn ExtractAction>,
    transform: FactoryMap<dyn TransformAction>,
    load: FactoryMap<dyn LoadAction>,
}

impl Default for ActionCatalog {
    fn default() -> Self {
        ActionCatalog::new()
    }
}

impl fmt::Debug for ActionCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionCatalog")
            .field("lifecycle", &self.lifecycle.names())
            .field("extract", &self.extract.names())
            .field("transform", &self.transform.names())
            .field("load", &self.load.names())
            .finish()
    }
}

impl ActionCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        ActionCatalog {
            lifecycle: FactoryMap::new("lifecycle"),
            extract: FactoryMap::new("extract"),
            transform: FactoryMap::new("transform"),
            load: FactoryMap::new("load"),
        }
    }

    /// A catalog holding the actions in [`builtin`].
    pub fn with_builtins() -> Self {
        let mut catalog = ActionCatalog::new();
        builtin::register(&mut catalog);
        catalog
    }

    pub fn register_lifecycle<F>(&mut self, name: &str, factory: F) -> &mut Self
    where
        F: Fn(&Value) -> Result<Arc<dyn LifecycleAction>, ActionError> + Send + Sync + 'static,
    {
        self.lifecycle.insert(name, Arc::new(factory));
        self
    }

    pub fn register_extract<F>(&mut self, name: &str, factory: F) -> &mut Self
    where
        F: Fn(&Value) -> Result<Arc<dyn ExtractAction>, ActionError> + Send + Sync + 'static,
    {
        self.extract.insert(name, Arc::new(factory));
        self
    }

    pub fn register_transform<F>(&mut self, name: &str, factory: F) -> &mut Self
    where
        F: Fn(&Value) -> Result<Arc<dyn TransformAction>, ActionError> + Send + Sync + 'static,
    {
        self.transform.insert(name, Arc::new(factory));
        self
    }

    pub fn register_load<F>(&mut self, name: &str, factory: F) -> &mut Self
    where
        F: Fn(&Value) -> Result<Arc<dyn LoadAction>, ActionError> + Send + Sync + 'static,
    {
        self.load.insert(name, Arc::new(factory));
        self
    }

    pub fn lifecycle(&self, action: &ActionRef) -> Result<Arc<dyn LifecycleAction>, CatalogError> {
        self.lifecycle.resolve(action)
    }

    pub fn extract(&self, action: &ActionRef) -> Result<Arc<dyn ExtractAction>, CatalogError> {
        self.extract.resolve(action)
    }

    pub fn transform(&self, action: &ActionRef) -> Result<Arc<dyn TransformAction>, CatalogError> {
        self.transform.resolve(action)
    }

    pub fn load(&self, action: &ActionRef) -> Result<Arc<dyn LoadAction>, CatalogError> {
        self.load.resolve(action)
    }
}

#[cfg(test)]
mod tests;
