pub mod config;
pub mod driver;
pub mod handle;
pub mod memory;
pub mod mongo;
pub mod postgres;
pub mod types;

pub use config::{StoreConfig, StoreFlags, StoreKind};
pub use driver::StoreDriver;
pub use handle::StoreHandle;
pub use memory::MemoryStore;
pub use types::{
    compare_values, is_empty_record, Query, QueryOptions, Record, RecordStream, SortOrder,
    StoreError, StoreOp,
};
