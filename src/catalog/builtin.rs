//! Built-in actions available to definition files.
//!
//! | phase | name | parameters |
//! |---|---|---|
//! | extract | `stream` | `query`, `options`, `concurrency` |
//! | extract | `query` | `query`, `options` |
//! | transform | `select` | `fields` |
//! | transform | `watermark` | `field`, `key` |
//! | load | `upsert` | `collection`, `key` |
//! | load | `insert` | `collection` |
//! | lifecycle | `restore` | `collection`, `id_field`, `id`, `keys` |
//! | lifecycle | `persist` | `collection`, `id_field`, `id`, `keys` |
//! | lifecycle | `log` | `message` |
//!
//! Query values and filters may contain `{{key}}` placeholders, filled from
//! the run registry when the action runs.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use futures::TryStreamExt;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::info;

use super::ActionCatalog;
use crate::operation::{
    ActionError, ExtractAction, LifecycleAction, LoadAction, OneOrMany, TransformAction,
};
use crate::pipeline::{RecordSink, Registry};
use crate::store::{Query, QueryOptions, Record, StoreHandle};

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([^{}\s]+)\s*\}\}").expect("valid placeholder regex"));

/// Registry key resolving to the run start time.
pub const STARTED_AT: &str = "started_at";

/// Field written by `persist` with the run start time.
pub const LAST_START: &str = "last_start";

pub(super) fn register(catalog: &mut ActionCatalog) {
    catalog
        .register_extract("stream", |params| {
            Ok(Arc::new(parse::<StreamExtract>(params)?) as Arc<dyn ExtractAction>)
        })
        .register_extract("query", |params| {
            Ok(Arc::new(parse::<QueryExtract>(params)?) as Arc<dyn ExtractAction>)
        })
        .register_transform("select", |params| {
            Ok(Arc::new(parse::<SelectFields>(params)?) as Arc<dyn TransformAction>)
        })
        .register_transform("watermark", |params| {
            Ok(Arc::new(parse::<Watermark>(params)?) as Arc<dyn TransformAction>)
        })
        .register_load("upsert", |params| {
            Ok(Arc::new(parse::<UpsertLoad>(params)?) as Arc<dyn LoadAction>)
        })
        .register_load("insert", |params| {
            Ok(Arc::new(parse::<InsertLoad>(params)?) as Arc<dyn LoadAction>)
        })
        .register_lifecycle("restore", |params| {
            Ok(Arc::new(parse::<RestoreState>(params)?) as Arc<dyn LifecycleAction>)
        })
        .register_lifecycle("persist", |params| {
            Ok(Arc::new(parse::<PersistState>(params)?) as Arc<dyn LifecycleAction>)
        })
        .register_lifecycle("log", |params| {
            Ok(Arc::new(parse::<LogRegistry>(params)?) as Arc<dyn LifecycleAction>)
        });
}

fn parse<T: DeserializeOwned>(params: &Value) -> Result<T, ActionError> {
    Ok(serde_json::from_value(params.clone())?)
}

fn registry_value(registry: &Registry, key: &str) -> Value {
    if key == STARTED_AT {
        return Value::String(registry.started_at().to_rfc3339());
    }
    registry.get(key).unwrap_or(Value::Null)
}

/// Fills `{{key}}` placeholders from the registry.
///
/// A string that is exactly one placeholder takes the registry value with
/// its type; placeholders inside longer strings are replaced by text.
pub fn interpolate(value: &Value, registry: &Registry) -> Value {
    match value {
        Value::String(text) => {
            if let Some(caps) = PLACEHOLDER_RE.captures(text) {
                if caps.get(0).map(|m| m.as_str().len()) == Some(text.len()) {
                    return registry_value(registry, &caps[1]);
                }
            }
            let rendered = PLACEHOLDER_RE.replace_all(text, |caps: &regex::Captures<'_>| {
                match registry_value(registry, &caps[1]) {
                    Value::String(s) => s,
                    Value::Null => String::new(),
                    other => other.to_string(),
                }
            });
            Value::String(rendered.into_owned())
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| interpolate(v, registry)).collect()),
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), interpolate(v, registry)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Query with placeholders filled. SQL text itself is never rewritten.
pub fn render_query(query: &Query, registry: &Registry) -> Query {
    match query {
        Query::Sql { text, values } => Query::Sql {
            text: text.clone(),
            values: values.iter().map(|v| interpolate(v, registry)).collect(),
        },
        Query::Find { collection, filter } => Query::Find {
            collection: collection.clone(),
            filter: filter
                .iter()
                .map(|(k, v)| (k.clone(), interpolate(v, registry)))
                .collect(),
        },
    }
}

fn lookup<'a>(record: &'a Record, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(record, |value, segment| match value {
        Value::Object(fields) => fields.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn default_concurrency() -> usize {
    1
}

/// Streams a query, keeping up to `concurrency` records in flight.
#[derive(Debug, Deserialize)]
pub struct StreamExtract {
    query: Query,
    #[serde(default)]
    options: QueryOptions,
    #[serde(default = "default_concurrency")]
    concurrency: usize,
}

#[async_trait]
impl ExtractAction for StreamExtract {
    async fn extract(
        &self,
        store: &StoreHandle,
        registry: &Registry,
        sink: &RecordSink<'_>,
    ) -> Result<(), ActionError> {
        let query = render_query(&self.query, registry);
        let records = store.stream(&query, &self.options).await?;
        records
            .map_err(ActionError::from)
            .try_for_each_concurrent(self.concurrency.max(1), |record| async move {
                sink.process(record).await.map_err(ActionError::from)
            })
            .await
    }
}

/// Fetches a query in one batch and processes the records in order.
#[derive(Debug, Deserialize)]
pub struct QueryExtract {
    query: Query,
    #[serde(default)]
    options: QueryOptions,
}

#[async_trait]
impl ExtractAction for QueryExtract {
    async fn extract(
        &self,
        store: &StoreHandle,
        registry: &Registry,
        sink: &RecordSink<'_>,
    ) -> Result<(), ActionError> {
        let query = render_query(&self.query, registry);
        for record in store.query(&query, &self.options).await? {
            sink.process(record).await?;
        }
        Ok(())
    }
}

/// Projects a record onto `fields` (output name to dotted source path).
/// Paths missing from the record are left out.
#[derive(Debug, Deserialize)]
pub struct SelectFields {
    fields: BTreeMap<String, String>,
}

impl TransformAction for SelectFields {
    fn transform(
        &self,
        _store: &StoreHandle,
        _registry: &Registry,
        record: Record,
    ) -> Result<Record, ActionError> {
        let selected: Map<String, Value> = self
            .fields
            .iter()
            .filter_map(|(output, path)| lookup(&record, path).map(|v| (output.clone(), v.clone())))
            .collect();
        Ok(Value::Object(selected))
    }
}

/// Advances registry `key` to the largest `field` value seen.
#[derive(Debug, Deserialize)]
pub struct Watermark {
    field: String,
    key: String,
}

impl TransformAction for Watermark {
    fn transform(
        &self,
        _store: &StoreHandle,
        registry: &Registry,
        record: Record,
    ) -> Result<Record, ActionError> {
        if let Some(value) = lookup(&record, &self.field) {
            registry.advance(&self.key, value);
        }
        Ok(record)
    }
}

#[derive(Deserialize)]
struct UpsertParams {
    collection: String,
    key: OneOrMany<String>,
}

/// Upserts each record keyed by one or more fields.
#[derive(Debug, Deserialize)]
#[serde(from = "UpsertParams")]
pub struct UpsertLoad {
    collection: String,
    key: Vec<String>,
}

impl From<UpsertParams> for UpsertLoad {
    fn from(params: UpsertParams) -> Self {
        UpsertLoad {
            collection: params.collection,
            key: params.key.into_vec(),
        }
    }
}

#[async_trait]
impl LoadAction for UpsertLoad {
    async fn load(
        &self,
        store: &StoreHandle,
        _registry: &Registry,
        record: &Record,
    ) -> Result<(), ActionError> {
        store.upsert(&self.collection, &self.key, record).await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct InsertLoad {
    collection: String,
}

#[async_trait]
impl LoadAction for InsertLoad {
    async fn load(
        &self,
        store: &StoreHandle,
        _registry: &Registry,
        record: &Record,
    ) -> Result<(), ActionError> {
        store.insert(&self.collection, record).await?;
        Ok(())
    }
}

fn default_id_field() -> String {
    "id".to_string()
}

/// Copies `keys` from one stored state document into the registry.
#[derive(Debug, Deserialize)]
pub struct RestoreState {
    collection: String,
    #[serde(default = "default_id_field")]
    id_field: String,
    id: Value,
    keys: Vec<String>,
}

#[async_trait]
impl LifecycleAction for RestoreState {
    async fn run(&self, store: &StoreHandle, registry: &Registry) -> Result<(), ActionError> {
        let query = Query::find(self.collection.as_str()).filter(self.id_field.as_str(), self.id.clone());
        let options = QueryOptions {
            limit: Some(1),
            ..Default::default()
        };
        let Some(state) = store.query(&query, &options).await?.into_iter().next() else {
            return Ok(());
        };
        for key in &self.keys {
            if let Some(value) = state.get(key).filter(|v| !v.is_null()) {
                registry.set(key.as_str(), value.clone());
            }
        }
        Ok(())
    }
}

/// Upserts registry `keys` plus the run start time into a state document.
#[derive(Debug, Deserialize)]
pub struct PersistState {
    collection: String,
    #[serde(default = "default_id_field")]
    id_field: String,
    id: Value,
    keys: Vec<String>,
}

#[async_trait]
impl LifecycleAction for PersistState {
    async fn run(&self, store: &StoreHandle, registry: &Registry) -> Result<(), ActionError> {
        let mut state = Map::new();
        state.insert(self.id_field.clone(), self.id.clone());
        state.insert(
            LAST_START.to_string(),
            Value::String(registry.started_at().to_rfc3339()),
        );
        for key in &self.keys {
            if let Some(value) = registry.get(key) {
                state.insert(key.clone(), value);
            }
        }
        store
            .upsert(&self.collection, &[self.id_field.clone()], &Value::Object(state))
            .await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct LogRegistry {
    #[serde(default)]
    message: Option<String>,
}

#[async_trait]
impl LifecycleAction for LogRegistry {
    async fn run(&self, store: &StoreHandle, registry: &Registry) -> Result<(), ActionError> {
        let snapshot = Value::Object(registry.snapshot());
        info!(
            store = store.alias(),
            registry = %snapshot,
            "{}",
            self.message.as_deref().unwrap_or("registry")
        );
        Ok(())
    }
}
