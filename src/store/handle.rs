// src/store/handle.rs

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use super::config::{StoreConfig, StoreFlags, StoreKind};
use super::driver::StoreDriver;
use super::memory::MemoryStore;
use super::mongo::MongoStore;
use super::postgres::PostgresStore;
use super::types::{Query, QueryOptions, Record, RecordStream, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Disconnected,
    Connected,
}

struct HandleInner {
    alias: String,
    location: String,
    driver: Arc<dyn StoreDriver>,
    state: Mutex<ConnState>,
    connected: AtomicBool,
    overrides: (Option<bool>, Option<bool>),
    debug: AtomicBool,
    verbose: AtomicBool,
}

/// Handle to one named store.
///
/// Cloning is cheap and every clone refers to the same connection. `connect`
/// and `close` are idempotent: concurrent `connect` callers wait on the same
/// dial, and closing a handle that never connected succeeds without touching
/// the driver.
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<HandleInner>,
}

impl fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreHandle")
            .field("alias", &self.inner.alias)
            .field("kind", &self.kind())
            .field("location", &self.inner.location)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl StoreHandle {
    pub fn new(
        alias: impl Into<String>,
        location: impl Into<String>,
        driver: Arc<dyn StoreDriver>,
    ) -> Self {
        StoreHandle {
            inner: Arc::new(HandleInner {
                alias: alias.into(),
                location: location.into(),
                driver,
                state: Mutex::new(ConnState::Disconnected),
                connected: AtomicBool::new(false),
                overrides: (None, None),
                debug: AtomicBool::new(false),
                verbose: AtomicBool::new(false),
            }),
        }
    }

    /// Wraps an in-memory store. The caller may keep a clone of `store` to
    /// inspect its contents.
    pub fn memory(alias: impl Into<String>, store: MemoryStore) -> Self {
        let alias = alias.into();
        let location = format!("memory/{alias}");
        StoreHandle::new(alias, location, Arc::new(store))
    }

    /// Builds the driver selected by `config.kind`.
    pub fn from_config(alias: impl Into<String>, config: &StoreConfig) -> Result<Self, StoreError> {
        let kind = config.validate()?;
        let driver: Arc<dyn StoreDriver> = match kind {
            StoreKind::Memory => Arc::new(MemoryStore::new()),
            StoreKind::Postgres => Arc::new(PostgresStore::new(config)),
            StoreKind::MongoDb => Arc::new(MongoStore::new(config)),
        };
        Ok(StoreHandle::configured(alias.into(), config, kind, driver))
    }

    /// Like [`from_config`](Self::from_config), with a caller-supplied driver.
    pub fn from_config_with_driver(
        alias: impl Into<String>,
        config: &StoreConfig,
        driver: Arc<dyn StoreDriver>,
    ) -> Result<Self, StoreError> {
        let kind = config.validate()?;
        Ok(StoreHandle::configured(alias.into(), config, kind, driver))
    }

    fn configured(
        alias: String,
        config: &StoreConfig,
        kind: StoreKind,
        driver: Arc<dyn StoreDriver>,
    ) -> Self {
        let location = match kind {
            StoreKind::Memory => format!("memory/{}", config.name),
            _ => format!(
                "{}:{}/{}",
                config.host(),
                config.port_or_default(kind),
                config.name
            ),
        };

        let mut handle = StoreHandle::new(alias, location, driver);
        if let Some(inner) = Arc::get_mut(&mut handle.inner) {
            inner.overrides = (config.debug, config.verbose);
        }
        handle
    }

    pub fn alias(&self) -> &str {
        &self.inner.alias
    }

    pub fn kind(&self) -> StoreKind {
        self.inner.driver.kind()
    }

    pub fn location(&self) -> &str {
        &self.inner.location
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    pub fn flags(&self) -> StoreFlags {
        StoreFlags {
            debug: self.inner.debug.load(Ordering::Relaxed),
            verbose: self.inner.verbose.load(Ordering::Relaxed),
        }
    }

    /// Applies operation-level flags unless the store overrides them.
    pub fn inherit_flags(&self, flags: StoreFlags) {
        let (debug, verbose) = self.inner.overrides;
        self.inner
            .debug
            .store(debug.unwrap_or(flags.debug), Ordering::Relaxed);
        self.inner
            .verbose
            .store(verbose.unwrap_or(flags.verbose), Ordering::Relaxed);
    }

    pub async fn connect(&self) -> Result<(), StoreError> {
        let mut state = self.inner.state.lock().await;
        if *state == ConnState::Connected {
            return Ok(());
        }

        self.lifecycle_event("connecting");
        self.inner.driver.connect().await?;
        *state = ConnState::Connected;
        self.inner.connected.store(true, Ordering::Release);
        self.lifecycle_event("connected");
        Ok(())
    }

    pub async fn close(&self) -> Result<(), StoreError> {
        let mut state = self.inner.state.lock().await;
        if *state == ConnState::Disconnected {
            return Ok(());
        }

        self.lifecycle_event("closing");
        *state = ConnState::Disconnected;
        self.inner.connected.store(false, Ordering::Release);
        self.inner.driver.close().await
    }

    pub async fn query(&self, query: &Query, options: &QueryOptions) -> Result<Vec<Record>, StoreError> {
        self.ensure_connected()?;
        self.inner.driver.query(query, options).await
    }

    pub async fn stream(
        &self,
        query: &Query,
        options: &QueryOptions,
    ) -> Result<RecordStream, StoreError> {
        self.ensure_connected()?;
        self.inner.driver.stream(query, options).await
    }

    pub async fn insert(&self, collection: &str, record: &Record) -> Result<(), StoreError> {
        self.ensure_connected()?;
        self.inner.driver.insert(collection, record).await
    }

    pub async fn upsert(
        &self,
        collection: &str,
        key: &[String],
        record: &Record,
    ) -> Result<(), StoreError> {
        self.ensure_connected()?;
        self.inner.driver.upsert(collection, key, record).await
    }

    fn ensure_connected(&self) -> Result<(), StoreError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(StoreError::NotConnected(self.inner.alias.clone()))
        }
    }

    fn lifecycle_event(&self, event: &str) {
        let kind = self.kind();
        if self.flags().debug {
            info!(store = %self.inner.alias, %kind, location = %self.inner.location, "{event}");
        } else {
            debug!(store = %self.inner.alias, %kind, location = %self.inner.location, "{event}");
        }
    }
}
