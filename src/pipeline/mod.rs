pub mod executor;
pub mod flow;
pub mod interval;
pub mod registry;
pub mod sink;
pub mod types;

pub use executor::PipelineExecutor;
pub use flow::{FlowCounter, InFlight, PARITY_RECHECK};
pub use interval::IntervalTrigger;
pub use registry::Registry;
pub use sink::RecordSink;
pub use types::{PipelineError, RecordError, RunReport, SourceReport};
