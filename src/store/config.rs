// src/store/config.rs

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::types::StoreError;

/// Closed set of supported store backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKind {
    Memory,
    Postgres,
    MongoDb,
}

impl StoreKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKind::Memory => "memory",
            StoreKind::Postgres => "postgresql",
            StoreKind::MongoDb => "mongodb",
        }
    }

    /// Port used when the configuration leaves it out.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            StoreKind::Memory => None,
            StoreKind::Postgres => Some(5432),
            StoreKind::MongoDb => Some(27017),
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mem" | "memory" => Ok(StoreKind::Memory),
            "pg" | "postgres" | "postgresql" => Ok(StoreKind::Postgres),
            "mg" | "mongo" | "mongodb" => Ok(StoreKind::MongoDb),
            other => Err(StoreError::InvalidConfig(format!(
                "unknown store type: {other}"
            ))),
        }
    }
}

/// Connection settings for one store, as written in a definition file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub pass: Option<String>,
    /// Overrides the operation's debug flag for this store.
    #[serde(default)]
    pub debug: Option<bool>,
    /// Overrides the operation's verbose flag for this store.
    #[serde(default)]
    pub verbose: Option<bool>,
    #[serde(default)]
    pub max_connections: Option<u32>,
}

impl StoreConfig {
    /// Checks required fields and normalizes the type tag.
    pub fn validate(&self) -> Result<StoreKind, StoreError> {
        let kind: StoreKind = self.kind.parse()?;
        if self.name.trim().is_empty() {
            return Err(StoreError::InvalidConfig(format!(
                "{kind} store name is required"
            )));
        }
        if kind != StoreKind::Memory && self.host.as_deref().map_or(true, str::is_empty) {
            return Err(StoreError::InvalidConfig(format!(
                "{kind} store '{}' requires a host",
                self.name
            )));
        }
        Ok(kind)
    }

    pub fn host(&self) -> &str {
        self.host.as_deref().unwrap_or("localhost")
    }

    pub fn port_or_default(&self, kind: StoreKind) -> u16 {
        self.port.or_else(|| kind.default_port()).unwrap_or_default()
    }
}

/// Debug/verbose switches resolved for one store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreFlags {
    pub debug: bool,
    pub verbose: bool,
}
