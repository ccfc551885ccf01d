pub mod action;
pub mod definition;
pub mod types;

pub use action::{
    transform_fn, ExtractAction, FnTransform, LifecycleAction, LoadAction, TransformAction,
};
pub use definition::{
    IntervalEntry, OneOrMany, OperationBuilder, OperationDefinition, PhaseActions, RawOperation,
    RawPhase, StoreSet,
};
pub use types::{ActionError, Phase, ValidationError};
