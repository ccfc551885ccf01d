// src/store/driver.rs

use async_trait::async_trait;

use super::config::StoreKind;
use super::types::{Query, QueryOptions, Record, RecordStream, StoreError};

/// Capability interface implemented by every store backend.
///
/// Drivers own their client. [`crate::store::StoreHandle`] guarantees that
/// `connect` succeeded before any data operation is called and never calls
/// `connect` or `close` concurrently on the same driver.
#[async_trait]
pub trait StoreDriver: Send + Sync {
    fn kind(&self) -> StoreKind;

    async fn connect(&self) -> Result<(), StoreError>;

    async fn close(&self) -> Result<(), StoreError>;

    /// Runs `query` and returns every matching record.
    async fn query(&self, query: &Query, options: &QueryOptions) -> Result<Vec<Record>, StoreError>;

    /// Runs `query` and yields records as the backend produces them.
    async fn stream(&self, query: &Query, options: &QueryOptions)
        -> Result<RecordStream, StoreError>;

    async fn insert(&self, collection: &str, record: &Record) -> Result<(), StoreError>;

    /// Inserts `record`, or replaces the fields of the existing record whose
    /// `key` fields match.
    async fn upsert(&self, collection: &str, key: &[String], record: &Record)
        -> Result<(), StoreError>;
}
