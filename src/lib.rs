//! # storeflow
//!
//! Declarative extract-transform-load pipelines across heterogeneous data
//! stores, built on Tokio.
//!
//! ## Features
//!
//! - **Lifecycle phases** (init, extract, transform, load, interval, exit)
//!   bound to named stores
//! - **Parity tracking**: a run only completes once every record read has
//!   been written or has failed
//! - **Periodic scheduling** with a bounded worker pool
//! - **YAML definitions** resolved through a catalog of named actions
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use storeflow::catalog::ActionRef;
//! use storeflow::operation::OperationDefinition;
//! use storeflow::pipeline::PipelineExecutor;
//! use storeflow::store::{MemoryStore, StoreHandle};
//!
//! let catalog = storeflow::catalog::ActionCatalog::with_builtins();
//! let definition = OperationDefinition::builder()
//!     .name("copy")
//!     .store(StoreHandle::memory("src", MemoryStore::new()))
//!     .store(StoreHandle::memory("dst", MemoryStore::new()))
//!     .extract("src", my_extract)
//!     .load("dst", my_load)
//!     .build()?;
//!
//! let executor = PipelineExecutor::new(definition);
//! let report = executor.run().await?;
//! executor.close().await?;
//! ```
//!
//! ## Modules
//!
//! - [`store`] - Store handles and drivers (memory, Postgres, MongoDB)
//! - [`operation`] - Action traits and validated operation definitions
//! - [`pipeline`] - The executor, record flow control and interval triggers
//! - [`catalog`] - Named action factories and the built-in actions
//! - [`config`] - Definition files and their resolution into jobs
//! - [`scheduler`] - Bounded-concurrency, periodic job scheduling

pub mod catalog;
pub mod config;
pub mod operation;
pub mod pipeline;
pub mod scheduler;
pub mod store;

pub use catalog::ActionCatalog;
pub use config::DefinitionLoader;
pub use operation::OperationDefinition;
pub use pipeline::PipelineExecutor;
pub use scheduler::{PipelineJob, ScheduleConfig, Scheduler};
pub use store::{Record, StoreHandle};
