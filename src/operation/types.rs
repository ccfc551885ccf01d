use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::store::StoreError;

/// Lifecycle phase of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Init,
    Extract,
    Transform,
    Load,
    Interval,
    Exit,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Init => "init",
            Phase::Extract => "extract",
            Phase::Transform => "transform",
            Phase::Load => "load",
            Phase::Interval => "interval",
            Phase::Exit => "exit",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by a user action.
///
/// Cheap to clone so one failure can be handed to every waiter.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ActionError {
    message: String,
    #[source]
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl ActionError {
    pub fn new(message: impl Into<String>) -> Self {
        ActionError {
            message: message.into(),
            source: None,
        }
    }

    /// Wraps `err`, using its display text as the message.
    pub fn from_source<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ActionError {
            message: err.to_string(),
            source: Some(Arc::new(err)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<StoreError> for ActionError {
    fn from(err: StoreError) -> Self {
        ActionError::from_source(err)
    }
}

impl From<serde_json::Error> for ActionError {
    fn from(err: serde_json::Error) -> Self {
        ActionError::from_source(err)
    }
}

impl From<String> for ActionError {
    fn from(message: String) -> Self {
        ActionError::new(message)
    }
}

impl From<&str> for ActionError {
    fn from(message: &str) -> Self {
        ActionError::new(message)
    }
}

/// Malformed operation definition. Raised before any store connects.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    MissingSection(&'static str),

    #[error("undefined store for {phase}: {alias}")]
    UnknownAlias { phase: Phase, alias: String },

    #[error("no actions defined for {phase}: {alias}")]
    EmptyActions { phase: Phase, alias: String },

    #[error("duplicate store alias: {0}")]
    DuplicateStore(String),

    #[error("interval size must be greater than zero")]
    ZeroInterval,
}
