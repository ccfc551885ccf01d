// src/operation/definition.rs

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;

use super::action::{ExtractAction, LifecycleAction, LoadAction, TransformAction};
use super::types::{Phase, ValidationError};
use crate::store::{StoreFlags, StoreHandle};

/// A single value or a list of values.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(item) => vec![item],
            OneOrMany::Many(items) => items,
        }
    }
}

impl<T> From<T> for OneOrMany<T> {
    fn from(item: T) -> Self {
        OneOrMany::One(item)
    }
}

/// Un-normalized phase: `(alias, action or actions)` in declaration order.
pub type RawPhase<A> = Vec<(String, OneOrMany<Arc<A>>)>;

/// Operation description as written by a user, before validation.
#[derive(Default)]
pub struct RawOperation {
    pub name: Option<String>,
    pub active: Option<bool>,
    pub debug: bool,
    pub verbose: bool,
    pub stores: Option<Vec<StoreHandle>>,
    pub init: Option<RawPhase<dyn LifecycleAction>>,
    pub extract: Option<RawPhase<dyn ExtractAction>>,
    pub transform: Option<RawPhase<dyn TransformAction>>,
    pub load: Option<RawPhase<dyn LoadAction>>,
    pub interval: Option<Vec<(u64, RawPhase<dyn LifecycleAction>)>>,
    pub exit: Option<RawPhase<dyn LifecycleAction>>,
}

/// Normalized phase: aliases in first-declaration order, each with an
/// ordered, non-empty action list.
pub struct PhaseActions<A: ?Sized> {
    entries: Vec<(String, Vec<Arc<A>>)>,
}

impl<A: ?Sized> Default for PhaseActions<A> {
    fn default() -> Self {
        PhaseActions {
            entries: Vec::new(),
        }
    }
}

impl<A: ?Sized> PhaseActions<A> {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Arc<A>])> {
        self.entries
            .iter()
            .map(|(alias, actions)| (alias.as_str(), actions.as_slice()))
    }

    /// Actions bound to `alias`, empty when there are none.
    pub fn get(&self, alias: &str) -> &[Arc<A>] {
        self.entries
            .iter()
            .find(|(a, _)| a == alias)
            .map(|(_, actions)| actions.as_slice())
            .unwrap_or(&[])
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(alias, _)| alias.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of actions across all aliases.
    pub fn action_count(&self) -> usize {
        self.entries.iter().map(|(_, actions)| actions.len()).sum()
    }

    fn normalize(
        phase: Phase,
        raw: RawPhase<A>,
        stores: &StoreSet,
    ) -> Result<Self, ValidationError> {
        let mut normalized = PhaseActions::default();
        for (alias, actions) in raw {
            if !stores.contains(&alias) {
                return Err(ValidationError::UnknownAlias { phase, alias });
            }
            let actions = actions.into_vec();
            if actions.is_empty() {
                return Err(ValidationError::EmptyActions { phase, alias });
            }
            match normalized.entries.iter_mut().find(|(a, _)| *a == alias) {
                Some((_, existing)) => existing.extend(actions),
                None => normalized.entries.push((alias, actions)),
            }
        }
        Ok(normalized)
    }
}

impl<A: ?Sized> fmt::Debug for PhaseActions<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(alias, actions)| (alias, actions.len())))
            .finish()
    }
}

/// Lifecycle actions fired every `size` successful writes of a source.
#[derive(Debug)]
pub struct IntervalEntry {
    pub size: u64,
    pub actions: PhaseActions<dyn LifecycleAction>,
}

impl IntervalEntry {
    /// True when `writes` is a positive multiple of the interval size.
    pub fn is_due(&self, writes: u64) -> bool {
        writes > 0 && writes % self.size == 0
    }
}

/// Stores of one operation, keyed by alias.
#[derive(Debug, Default)]
pub struct StoreSet {
    stores: Vec<StoreHandle>,
}

impl StoreSet {
    pub fn new(stores: Vec<StoreHandle>) -> Result<Self, ValidationError> {
        let mut seen = HashSet::new();
        for store in &stores {
            if !seen.insert(store.alias()) {
                return Err(ValidationError::DuplicateStore(store.alias().to_string()));
            }
        }
        Ok(StoreSet { stores })
    }

    pub fn get(&self, alias: &str) -> Option<&StoreHandle> {
        self.stores.iter().find(|store| store.alias() == alias)
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.get(alias).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StoreHandle> {
        self.stores.iter()
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}

/// A validated operation. Every alias used by a phase is present in
/// [`OperationDefinition::stores`].
#[derive(Debug)]
pub struct OperationDefinition {
    name: Option<String>,
    active: bool,
    verbose: bool,
    stores: StoreSet,
    pub(crate) init: PhaseActions<dyn LifecycleAction>,
    pub(crate) extract: PhaseActions<dyn ExtractAction>,
    pub(crate) transform: PhaseActions<dyn TransformAction>,
    pub(crate) load: PhaseActions<dyn LoadAction>,
    pub(crate) interval: Vec<IntervalEntry>,
    pub(crate) exit: PhaseActions<dyn LifecycleAction>,
}

impl OperationDefinition {
    pub fn builder() -> OperationBuilder {
        OperationBuilder::default()
    }

    pub fn new(raw: RawOperation) -> Result<Self, ValidationError> {
        let stores = raw
            .stores
            .ok_or(ValidationError::MissingSection("stores"))?;
        let extract = raw
            .extract
            .filter(|phase| !phase.is_empty())
            .ok_or(ValidationError::MissingSection("extract"))?;
        let load = raw
            .load
            .filter(|phase| !phase.is_empty())
            .ok_or(ValidationError::MissingSection("load"))?;

        let stores = StoreSet::new(stores)?;
        let init = PhaseActions::normalize(Phase::Init, raw.init.unwrap_or_default(), &stores)?;
        let extract = PhaseActions::normalize(Phase::Extract, extract, &stores)?;
        let transform =
            PhaseActions::normalize(Phase::Transform, raw.transform.unwrap_or_default(), &stores)?;
        let load = PhaseActions::normalize(Phase::Load, load, &stores)?;
        let exit = PhaseActions::normalize(Phase::Exit, raw.exit.unwrap_or_default(), &stores)?;

        let mut interval = Vec::new();
        for (size, phase) in raw.interval.unwrap_or_default() {
            if size == 0 {
                return Err(ValidationError::ZeroInterval);
            }
            let actions = PhaseActions::normalize(Phase::Interval, phase, &stores)?;
            if !actions.is_empty() {
                interval.push(IntervalEntry { size, actions });
            }
        }

        let flags = StoreFlags {
            debug: raw.debug,
            verbose: raw.verbose,
        };
        for store in stores.iter() {
            store.inherit_flags(flags);
        }

        Ok(OperationDefinition {
            name: raw.name,
            active: raw.active.unwrap_or(true),
            verbose: raw.verbose,
            stores,
            init,
            extract,
            transform,
            load,
            interval,
            exit,
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Name used in logs and reports.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("operation")
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    pub fn stores(&self) -> &StoreSet {
        &self.stores
    }

    pub fn init(&self) -> &PhaseActions<dyn LifecycleAction> {
        &self.init
    }

    pub fn extract(&self) -> &PhaseActions<dyn ExtractAction> {
        &self.extract
    }

    pub fn transform(&self) -> &PhaseActions<dyn TransformAction> {
        &self.transform
    }

    pub fn load(&self) -> &PhaseActions<dyn LoadAction> {
        &self.load
    }

    pub fn interval(&self) -> &[IntervalEntry] {
        &self.interval
    }

    pub fn exit(&self) -> &PhaseActions<dyn LifecycleAction> {
        &self.exit
    }
}

/// Fluent construction of a [`RawOperation`] from code.
#[derive(Default)]
pub struct OperationBuilder {
    raw: RawOperation,
}

fn push_action<A: ?Sized>(phase: &mut Option<RawPhase<A>>, alias: &str, action: Arc<A>) {
    phase
        .get_or_insert_with(Vec::new)
        .push((alias.to_string(), OneOrMany::One(action)));
}

impl OperationBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.raw.name = Some(name.into());
        self
    }

    pub fn active(mut self, active: bool) -> Self {
        self.raw.active = Some(active);
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.raw.debug = debug;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.raw.verbose = verbose;
        self
    }

    pub fn store(mut self, store: StoreHandle) -> Self {
        self.raw.stores.get_or_insert_with(Vec::new).push(store);
        self
    }

    pub fn init(mut self, alias: &str, action: impl LifecycleAction + 'static) -> Self {
        let action: Arc<dyn LifecycleAction> = Arc::new(action);
        push_action(&mut self.raw.init, alias, action);
        self
    }

    pub fn extract(mut self, alias: &str, action: impl ExtractAction + 'static) -> Self {
        let action: Arc<dyn ExtractAction> = Arc::new(action);
        push_action(&mut self.raw.extract, alias, action);
        self
    }

    pub fn transform(mut self, alias: &str, action: impl TransformAction + 'static) -> Self {
        let action: Arc<dyn TransformAction> = Arc::new(action);
        push_action(&mut self.raw.transform, alias, action);
        self
    }

    pub fn load(mut self, alias: &str, action: impl LoadAction + 'static) -> Self {
        let action: Arc<dyn LoadAction> = Arc::new(action);
        push_action(&mut self.raw.load, alias, action);
        self
    }

    /// Adds a lifecycle action fired every `size` writes of each source.
    pub fn interval(mut self, size: u64, alias: &str, action: impl LifecycleAction + 'static) -> Self {
        let action: Arc<dyn LifecycleAction> = Arc::new(action);
        let entries = self.raw.interval.get_or_insert_with(Vec::new);
        match entries.iter_mut().find(|(s, _)| *s == size) {
            Some((_, phase)) => phase.push((alias.to_string(), OneOrMany::One(action))),
            None => entries.push((size, vec![(alias.to_string(), OneOrMany::One(action))])),
        }
        self
    }

    pub fn exit(mut self, alias: &str, action: impl LifecycleAction + 'static) -> Self {
        let action: Arc<dyn LifecycleAction> = Arc::new(action);
        push_action(&mut self.raw.exit, alias, action);
        self
    }

    pub fn into_raw(self) -> RawOperation {
        self.raw
    }

    pub fn build(self) -> Result<OperationDefinition, ValidationError> {
        OperationDefinition::new(self.raw)
    }
}
