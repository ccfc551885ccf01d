// src/store/memory.rs

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{Map, Value};

use super::config::StoreKind;
use super::driver::StoreDriver;
use super::types::{
    compare_values, Query, QueryOptions, Record, RecordStream, SortOrder, StoreError, StoreOp,
};

#[derive(Default)]
struct MemoryInner {
    collections: Mutex<HashMap<String, Vec<Record>>>,
    connects: AtomicUsize,
    closes: AtomicUsize,
}

/// Store backed by process memory, addressed with [`Query::Find`].
///
/// Clones share the same collections, so a test can keep one clone and hand
/// another to a [`crate::store::StoreHandle`].
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds `collection` with `records`, replacing previous contents.
    pub fn with_collection(self, collection: &str, records: Vec<Record>) -> Self {
        self.collections().insert(collection.to_string(), records);
        self
    }

    /// Snapshot of the documents in `collection`, in insertion order.
    pub fn documents(&self, collection: &str) -> Vec<Record> {
        self.collections()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn connect_count(&self) -> usize {
        self.inner.connects.load(AtomicOrdering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.inner.closes.load(AtomicOrdering::SeqCst)
    }

    fn collections(&self) -> MutexGuard<'_, HashMap<String, Vec<Record>>> {
        // a panic while holding the lock cannot leave a partial write behind
        self.inner
            .collections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn select(&self, query: &Query, options: &QueryOptions, op: StoreOp) -> Result<Vec<Record>, StoreError> {
        let Query::Find { collection, filter } = query else {
            return Err(StoreError::Unsupported {
                kind: StoreKind::Memory.as_str(),
                op,
            });
        };

        let mut records: Vec<Record> = self
            .collections()
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|doc| matches_filter(doc, filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if !options.sort.is_empty() {
            records.sort_by(|a, b| compare_by(a, b, &options.sort));
        }

        let offset = options.offset.unwrap_or(0) as usize;
        let limit = options.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        Ok(records.into_iter().skip(offset).take(limit).collect())
    }
}

fn matches_filter(doc: &Record, filter: &Map<String, Value>) -> bool {
    filter
        .iter()
        .all(|(field, expected)| doc.get(field) == Some(expected))
}

fn compare_by(a: &Record, b: &Record, sort: &[(String, SortOrder)]) -> Ordering {
    for (field, order) in sort {
        let left = a.get(field).unwrap_or(&Value::Null);
        let right = b.get(field).unwrap_or(&Value::Null);
        let ord = compare_values(left, right).unwrap_or(Ordering::Equal);
        let ord = match order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn key_values<'a>(record: &'a Record, key: &[String]) -> Result<Vec<&'a Value>, StoreError> {
    if !record.is_object() {
        return Err(StoreError::InvalidRecord(
            "upsert requires an object record".to_string(),
        ));
    }
    key.iter()
        .map(|field| {
            record
                .get(field)
                .ok_or_else(|| StoreError::InvalidRecord(format!("missing key field '{field}'")))
        })
        .collect()
}

#[async_trait]
impl StoreDriver for MemoryStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Memory
    }

    async fn connect(&self) -> Result<(), StoreError> {
        self.inner.connects.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.inner.closes.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(())
    }

    async fn query(&self, query: &Query, options: &QueryOptions) -> Result<Vec<Record>, StoreError> {
        self.select(query, options, StoreOp::Query)
    }

    async fn stream(
        &self,
        query: &Query,
        options: &QueryOptions,
    ) -> Result<RecordStream, StoreError> {
        let records = self.select(query, options, StoreOp::Stream)?;
        Ok(stream::iter(records.into_iter().map(Ok)).boxed())
    }

    async fn insert(&self, collection: &str, record: &Record) -> Result<(), StoreError> {
        if record.is_null() {
            return Err(StoreError::InvalidRecord("cannot insert null".to_string()));
        }
        self.collections()
            .entry(collection.to_string())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn upsert(
        &self,
        collection: &str,
        key: &[String],
        record: &Record,
    ) -> Result<(), StoreError> {
        let wanted = key_values(record, key)?;
        let mut collections = self.collections();
        let docs = collections.entry(collection.to_string()).or_default();

        let existing = docs.iter_mut().find(|doc| {
            key.iter()
                .zip(&wanted)
                .all(|(field, value)| doc.get(field) == Some(*value))
        });

        match (existing, record.as_object()) {
            (Some(Value::Object(doc)), Some(fields)) => {
                for (field, value) in fields {
                    doc.insert(field.clone(), value.clone());
                }
            }
            _ => docs.push(record.clone()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use serde_json::json;

    fn key(field: &str) -> Vec<String> {
        vec![field.to_string()]
    }

    #[tokio::test]
    async fn test_find_filters_sorts_and_pages() {
        let store = MemoryStore::new().with_collection(
            "users",
            vec![
                json!({"id": 3, "active": true}),
                json!({"id": 1, "active": true}),
                json!({"id": 2, "active": false}),
                json!({"id": 4, "active": true}),
            ],
        );
        let options = QueryOptions {
            limit: Some(2),
            offset: Some(1),
            sort: vec![("id".to_string(), SortOrder::Asc)],
        };

        let records = store
            .query(&Query::find("users").filter("active", true), &options)
            .await
            .unwrap();
        assert_eq!(records, vec![json!({"id": 3, "active": true}), json!({"id": 4, "active": true})]);
    }

    #[tokio::test]
    async fn test_stream_yields_all_records() {
        let store = MemoryStore::new().with_collection("t", vec![json!({"id": 1}), json!({"id": 2})]);
        let records: Vec<Record> = store
            .stream(&Query::find("t"), &QueryOptions::default())
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn test_sql_is_unsupported() {
        let store = MemoryStore::new();
        let err = store
            .query(&Query::sql("select 1"), &QueryOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unsupported { op: StoreOp::Query, .. }));
    }

    #[tokio::test]
    async fn test_upsert_replaces_matching_document() {
        let store = MemoryStore::new();
        store.upsert("t", &key("id"), &json!({"id": 1, "v": "a"})).await.unwrap();
        store.upsert("t", &key("id"), &json!({"id": 2, "v": "b"})).await.unwrap();
        store.upsert("t", &key("id"), &json!({"id": 1, "v": "c"})).await.unwrap();

        assert_eq!(
            store.documents("t"),
            vec![json!({"id": 1, "v": "c"}), json!({"id": 2, "v": "b"})]
        );
    }

    #[tokio::test]
    async fn test_upsert_requires_key_field() {
        let store = MemoryStore::new();
        let err = store.upsert("t", &key("id"), &json!({"v": 1})).await.unwrap_err();
        assert!(err.to_string().contains("missing key field 'id'"));
    }
}
