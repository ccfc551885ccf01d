use tracing::debug;

use super::registry::Registry;
use super::types::RecordError;
use crate::operation::{ActionError, IntervalEntry, Phase, StoreSet};

/// Fires interval actions on write milestones of one source.
pub struct IntervalTrigger<'a> {
    entries: &'a [IntervalEntry],
    stores: &'a StoreSet,
}

impl<'a> IntervalTrigger<'a> {
    pub fn new(entries: &'a [IntervalEntry], stores: &'a StoreSet) -> Self {
        IntervalTrigger { entries, stores }
    }

    /// Entries whose size evenly divides `writes`.
    pub fn due(&self, writes: u64) -> impl Iterator<Item = &'a IntervalEntry> {
        self.entries.iter().filter(move |entry| entry.is_due(writes))
    }

    /// Runs, in series, every action of every entry due at `writes`.
    pub async fn fire(&self, writes: u64, registry: &Registry) -> Result<(), RecordError> {
        for entry in self.due(writes) {
            debug!(writes, size = entry.size, "interval reached");
            for (alias, actions) in entry.actions.iter() {
                let store = self.stores.get(alias).ok_or_else(|| {
                    RecordError::new(
                        Phase::Interval,
                        alias,
                        0,
                        ActionError::new(format!("undefined store: {alias}")),
                    )
                })?;
                for (index, action) in actions.iter().enumerate() {
                    action
                        .run(store, registry)
                        .await
                        .map_err(|err| RecordError::new(Phase::Interval, alias, index, err))?;
                }
            }
        }
        Ok(())
    }
}
