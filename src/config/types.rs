//! Definition file schema.

use std::fmt;
use std::marker::PhantomData;
use std::path::PathBuf;

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use thiserror::Error;

use crate::catalog::{ActionRef, CatalogError};
use crate::operation::{OneOrMany, ValidationError};
use crate::store::{StoreConfig, StoreError};

/// Map that keeps the order entries were written in.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedMap<K, V>(pub Vec<(K, V)>);

impl<K, V> Default for OrderedMap<K, V> {
    fn default() -> Self {
        OrderedMap(Vec::new())
    }
}

impl<K, V> OrderedMap<K, V> {
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.0.iter().map(|(k, v)| (k, v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de, K, V> Deserialize<'de> for OrderedMap<K, V>
where
    K: Deserialize<'de>,
    V: Deserialize<'de>,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor<K, V>(PhantomData<(K, V)>);

        impl<'de, K, V> Visitor<'de> for EntriesVisitor<K, V>
        where
            K: Deserialize<'de>,
            V: Deserialize<'de>,
        {
            type Value = OrderedMap<K, V>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some(entry) = access.next_entry()? {
                    entries.push(entry);
                }
                Ok(OrderedMap(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor(PhantomData))
    }
}

/// Interval key: a positive write count, written as a number or a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalSize(pub u64);

impl<'de> Deserialize<'de> for IntervalSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SizeVisitor;

        impl Visitor<'_> for SizeVisitor {
            type Value = IntervalSize;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a positive write count")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(IntervalSize(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                u64::try_from(v)
                    .map(IntervalSize)
                    .map_err(|_| E::invalid_value(de::Unexpected::Signed(v), &self))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                v.trim()
                    .parse()
                    .map(IntervalSize)
                    .map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
            }
        }

        deserializer.deserialize_any(SizeVisitor)
    }
}

/// Aliases mapped to one action reference or a list of them.
pub type PhaseSpec = OrderedMap<String, OneOrMany<ActionRef>>;

/// One operation as written in a file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperationSpec {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub debug: Option<bool>,
    #[serde(default)]
    pub verbose: Option<bool>,
    #[serde(default)]
    pub init: Option<PhaseSpec>,
    #[serde(default)]
    pub extract: Option<PhaseSpec>,
    #[serde(default)]
    pub transform: Option<PhaseSpec>,
    #[serde(default)]
    pub load: Option<PhaseSpec>,
    #[serde(default)]
    pub interval: Option<OrderedMap<IntervalSize, PhaseSpec>>,
    #[serde(default)]
    pub exit: Option<PhaseSpec>,
}

/// Top level of a definition file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefinitionFile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default, alias = "db")]
    pub stores: Option<OrderedMap<String, StoreConfig>>,
    /// A single operation or a list run in series.
    #[serde(default, alias = "op", alias = "operations")]
    pub operation: Option<OneOrMany<OperationSpec>>,
}

/// Switches forced onto every loaded operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Overrides {
    pub debug: bool,
    pub verbose: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{}: missing environment variable(s): {}", path.display(), names.join(", "))]
    MissingEnv { path: PathBuf, names: Vec<String> },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("{}: no operation defined", path.display())]
    NoOperation { path: PathBuf },

    #[error("{}: store '{alias}': {source}", path.display())]
    Store {
        path: PathBuf,
        alias: String,
        source: StoreError,
    },

    #[error("{}: {source}", path.display())]
    Catalog {
        path: PathBuf,
        source: CatalogError,
    },

    #[error("{}: operation '{operation}': {source}", path.display())]
    Validation {
        path: PathBuf,
        operation: String,
        source: ValidationError,
    },

    #[error("no definition files found in {}", paths.join(", "))]
    NoDefinitions { paths: Vec<String> },
}
