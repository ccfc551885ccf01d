// src/config/resolve.rs

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use super::discovery::discover;
use super::parser::{parse_definition, parse_definition_file};
use super::types::{ConfigError, DefinitionFile, OrderedMap, Overrides, PhaseSpec};
use crate::catalog::{ActionCatalog, ActionRef, CatalogError};
use crate::operation::{OneOrMany, OperationDefinition, RawOperation, RawPhase};
use crate::pipeline::PipelineExecutor;
use crate::scheduler::PipelineJob;
use crate::store::{MemoryStore, StoreConfig, StoreHandle, StoreKind};

/// Turns definition files into [`PipelineJob`]s.
///
/// Every operation gets its own store handles, so operations never share a
/// connection. Memory stores registered with
/// [`with_memory_store`](Self::with_memory_store) are shared by name, which
/// lets an embedding program seed or inspect them.
pub struct DefinitionLoader {
    catalog: ActionCatalog,
    overrides: Overrides,
    memory: HashMap<String, MemoryStore>,
}

impl Default for DefinitionLoader {
    fn default() -> Self {
        DefinitionLoader::new(ActionCatalog::with_builtins())
    }
}

impl DefinitionLoader {
    pub fn new(catalog: ActionCatalog) -> Self {
        DefinitionLoader {
            catalog,
            overrides: Overrides::default(),
            memory: HashMap::new(),
        }
    }

    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_memory_store(mut self, name: impl Into<String>, store: MemoryStore) -> Self {
        self.memory.insert(name.into(), store);
        self
    }

    pub fn catalog(&self) -> &ActionCatalog {
        &self.catalog
    }

    /// Loads every definition found under `paths`. Stops at the first
    /// invalid file so nothing runs with a partial set.
    pub fn load_paths(&self, paths: &[PathBuf]) -> Result<Vec<PipelineJob>, ConfigError> {
        discover(paths)?
            .iter()
            .map(|path| self.load_file(path))
            .collect()
    }

    pub fn load_file(&self, path: &Path) -> Result<PipelineJob, ConfigError> {
        let file = parse_definition_file(path)?;
        self.resolve(file, path)
    }

    /// Loads definition text; `path` names it in errors and logs.
    pub fn load_str(&self, yaml: &str, path: &Path) -> Result<PipelineJob, ConfigError> {
        let file = parse_definition(yaml, path)?;
        self.resolve(file, path)
    }

    pub fn resolve(&self, file: DefinitionFile, path: &Path) -> Result<PipelineJob, ConfigError> {
        let operations = file
            .operation
            .map(OneOrMany::into_vec)
            .filter(|ops| !ops.is_empty())
            .ok_or_else(|| ConfigError::NoOperation {
                path: path.to_path_buf(),
            })?;

        let label = file.name.clone().unwrap_or_else(|| file_label(path));
        let numbered = operations.len() > 1;
        let catalog_err = |source: CatalogError| ConfigError::Catalog {
            path: path.to_path_buf(),
            source,
        };

        let mut executors = Vec::with_capacity(operations.len());
        for (position, spec) in operations.into_iter().enumerate() {
            let name = match spec.name {
                Some(name) => name,
                None if numbered => format!("{label}#{}", position + 1),
                None => label.clone(),
            };

            let stores = match &file.stores {
                Some(stores) => Some(self.build_stores(stores, path)?),
                None => None,
            };

            let interval = match spec.interval {
                Some(entries) => Some(
                    entries
                        .0
                        .into_iter()
                        .map(|(size, phase)| {
                            resolve_phase(phase, |r| self.catalog.lifecycle(r)).map(|p| (size.0, p))
                        })
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(catalog_err)?,
                ),
                None => None,
            };

            let raw = RawOperation {
                name: Some(name.clone()),
                active: spec.active,
                debug: self.overrides.debug || spec.debug.unwrap_or(file.debug),
                verbose: self.overrides.verbose || spec.verbose.unwrap_or(file.verbose),
                stores,
                init: resolve_optional(spec.init, |r| self.catalog.lifecycle(r)).map_err(catalog_err)?,
                extract: resolve_optional(spec.extract, |r| self.catalog.extract(r))
                    .map_err(catalog_err)?,
                transform: resolve_optional(spec.transform, |r| self.catalog.transform(r))
                    .map_err(catalog_err)?,
                load: resolve_optional(spec.load, |r| self.catalog.load(r)).map_err(catalog_err)?,
                interval,
                exit: resolve_optional(spec.exit, |r| self.catalog.lifecycle(r)).map_err(catalog_err)?,
            };

            let definition =
                OperationDefinition::new(raw).map_err(|source| ConfigError::Validation {
                    path: path.to_path_buf(),
                    operation: name.clone(),
                    source,
                })?;
            debug!(path = %path.display(), operation = %name, "operation loaded");
            executors.push(PipelineExecutor::new(definition));
        }

        Ok(PipelineJob::new(label, executors).with_source(path))
    }

    fn build_stores(
        &self,
        stores: &OrderedMap<String, StoreConfig>,
        path: &Path,
    ) -> Result<Vec<StoreHandle>, ConfigError> {
        stores
            .iter()
            .map(|(alias, config)| {
                let shared = match config.validate() {
                    Ok(StoreKind::Memory) => self.memory.get(&config.name),
                    _ => None,
                };
                let handle = match shared {
                    Some(store) => {
                        StoreHandle::from_config_with_driver(alias.as_str(), config, Arc::new(store.clone()))
                    }
                    None => StoreHandle::from_config(alias.as_str(), config),
                };
                handle.map_err(|source| ConfigError::Store {
                    path: path.to_path_buf(),
                    alias: alias.clone(),
                    source,
                })
            })
            .collect()
    }
}

fn file_label(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn resolve_phase<A, F>(phase: PhaseSpec, resolve: F) -> Result<RawPhase<A>, CatalogError>
where
    A: ?Sized,
    F: Fn(&ActionRef) -> Result<Arc<A>, CatalogError>,
{
    phase
        .0
        .into_iter()
        .map(|(alias, refs)| {
            let actions = refs
                .into_vec()
                .iter()
                .map(&resolve)
                .collect::<Result<Vec<_>, _>>()?;
            Ok((alias, OneOrMany::Many(actions)))
        })
        .collect()
}

fn resolve_optional<A, F>(
    phase: Option<PhaseSpec>,
    resolve: F,
) -> Result<Option<RawPhase<A>>, CatalogError>
where
    A: ?Sized,
    F: Fn(&ActionRef) -> Result<Arc<A>, CatalogError>,
{
    phase.map(|phase| resolve_phase(phase, resolve)).transpose()
}
