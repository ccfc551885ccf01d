//! Definition files: parsing, `${VAR}` substitution, discovery and
//! resolution into pipeline jobs.

pub mod discovery;
pub mod parser;
pub mod resolve;
pub mod types;

pub use discovery::discover;
pub use parser::{parse_definition, parse_definition_file, substitute_env_vars};
pub use resolve::DefinitionLoader;
pub use types::{
    ConfigError, DefinitionFile, IntervalSize, OperationSpec, OrderedMap, Overrides, PhaseSpec,
};
