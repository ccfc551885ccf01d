use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// One unit of data moved by a pipeline.
///
/// The engine imposes no schema. `Value::Null` means "no record".
pub type Record = Value;

/// Incremental result of [`crate::store::StoreDriver::stream`].
pub type RecordStream = BoxStream<'static, Result<Record, StoreError>>;

/// Returns `true` when `record` carries no data.
#[inline]
pub fn is_empty_record(record: &Record) -> bool {
    record.is_null()
}

/// Orders two JSON scalars: numbers numerically, strings lexically,
/// `false < true`. Values of different or non-scalar types are incomparable.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// A query description understood by one or more store drivers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Query {
    /// Raw SQL with positional parameters (`$1`, `$2`, ...).
    Sql {
        text: String,
        #[serde(default)]
        values: Vec<Value>,
    },
    /// Documents of `collection` whose fields equal every entry of `filter`.
    Find {
        collection: String,
        #[serde(default)]
        filter: Map<String, Value>,
    },
}

impl Query {
    pub fn sql(text: impl Into<String>) -> Self {
        Query::Sql {
            text: text.into(),
            values: Vec::new(),
        }
    }

    pub fn find(collection: impl Into<String>) -> Self {
        Query::Find {
            collection: collection.into(),
            filter: Map::new(),
        }
    }

    /// Adds an equality condition to a `Find` query. No-op for SQL.
    pub fn filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        if let Query::Find { filter, .. } = &mut self {
            filter.insert(field.into(), value.into());
        }
        self
    }
}

/// Sort direction for [`QueryOptions::sort`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOptions {
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
    /// Ordered `(field, direction)` pairs.
    #[serde(default)]
    pub sort: Vec<(String, SortOrder)>,
}

/// Store operation names, used in [`StoreError::Unsupported`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Query,
    Stream,
    Insert,
    Upsert,
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StoreOp::Query => "query",
            StoreOp::Stream => "stream",
            StoreOp::Insert => "insert",
            StoreOp::Upsert => "upsert",
        };
        f.write_str(name)
    }
}

/// Errors raised by store handles and drivers.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("store '{0}' is not connected")]
    NotConnected(String),

    #[error("invalid store configuration: {0}")]
    InvalidConfig(String),

    #[error("{op} is not supported by {kind} stores for this query")]
    Unsupported { kind: &'static str, op: StoreOp },

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("connection failed: {0}")]
    Connection(#[source] Arc<dyn std::error::Error + Send + Sync>),

    #[error("{0}")]
    Backend(#[source] Arc<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn connection<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StoreError::Connection(Arc::new(err))
    }

    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StoreError::Backend(Arc::new(err))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::backend(err)
    }
}

impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        StoreError::backend(err)
    }
}
