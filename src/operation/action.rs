// src/operation/action.rs

use async_trait::async_trait;

use super::types::ActionError;
use crate::pipeline::{RecordSink, Registry};
use crate::store::{Record, StoreHandle};

/// Action run once per store during the init, interval and exit phases.
#[async_trait]
pub trait LifecycleAction: Send + Sync {
    async fn run(&self, store: &StoreHandle, registry: &Registry) -> Result<(), ActionError>;
}

/// Produces records from a source store.
///
/// Every record is handed to [`RecordSink::process`]. An action may process
/// records concurrently; the executor waits until every record it produced
/// has settled before finalizing the source.
#[async_trait]
pub trait ExtractAction: Send + Sync {
    async fn extract(
        &self,
        store: &StoreHandle,
        registry: &Registry,
        sink: &RecordSink<'_>,
    ) -> Result<(), ActionError>;
}

/// Rewrites one record. Returning `Value::Null` drops the record.
pub trait TransformAction: Send + Sync {
    fn transform(
        &self,
        store: &StoreHandle,
        registry: &Registry,
        record: Record,
    ) -> Result<Record, ActionError>;
}

/// Writes one record to a target store.
#[async_trait]
pub trait LoadAction: Send + Sync {
    async fn load(
        &self,
        store: &StoreHandle,
        registry: &Registry,
        record: &Record,
    ) -> Result<(), ActionError>;
}

/// [`TransformAction`] backed by a closure. See [`transform_fn`].
pub struct FnTransform<F>(F);

impl<F> TransformAction for FnTransform<F>
where
    F: Fn(&StoreHandle, &Registry, Record) -> Result<Record, ActionError> + Send + Sync,
{
    fn transform(
        &self,
        store: &StoreHandle,
        registry: &Registry,
        record: Record,
    ) -> Result<Record, ActionError> {
        (self.0)(store, registry, record)
    }
}

pub fn transform_fn<F>(f: F) -> FnTransform<F>
where
    F: Fn(&StoreHandle, &Registry, Record) -> Result<Record, ActionError> + Send + Sync,
{
    FnTransform(f)
}
