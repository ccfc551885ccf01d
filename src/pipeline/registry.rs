use std::cmp::Ordering;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::store::compare_values;

/// Per-run context shared by every action of one run.
///
/// Carries the run start time plus free-form values such as watermarks that
/// init actions restore and exit actions persist.
#[derive(Debug)]
pub struct Registry {
    started_at: DateTime<Utc>,
    values: Mutex<Map<String, Value>>,
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            started_at: Utc::now(),
            values: Mutex::new(Map::new()),
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values().get(key).cloned()
    }

    /// Stores `value` under `key`, returning the previous value.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values().insert(key.into(), value.into())
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.values().remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values().contains_key(key)
    }

    pub fn snapshot(&self) -> Map<String, Value> {
        self.values().clone()
    }

    /// Raises `key` to `candidate` if it is unset or `candidate` is greater.
    ///
    /// Returns `true` when the stored value changed. Values that cannot be
    /// compared with the current one are ignored.
    pub fn advance(&self, key: &str, candidate: &Value) -> bool {
        if candidate.is_null() {
            return false;
        }
        let mut values = self.values();
        let replace = match values.get(key) {
            None | Some(Value::Null) => true,
            Some(current) => compare_values(candidate, current) == Some(Ordering::Greater),
        };
        if replace {
            values.insert(key.to_string(), candidate.clone());
        }
        replace
    }

    fn values(&self) -> MutexGuard<'_, Map<String, Value>> {
        self.values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
