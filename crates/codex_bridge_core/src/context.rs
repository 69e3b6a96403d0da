use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("run context is read-only")]
    ReadOnly,
    #[error("run context is frozen")]
    Frozen,
    #[error("run context has no field \"{0}\"")]
    MissingField(String),
    #[error("run context rejected write to \"{key}\": {reason}")]
    Rejected { key: String, reason: String },
}

/// Caller-owned state bag threaded through one orchestration run.
///
/// Hosts hand an `Arc<dyn RunContext>` to tools; a tool may read a value,
/// probe whether a key is writable before doing any work, and write back.
/// Implementations use interior mutability so one context can be shared by
/// every tool call of a run.
pub trait RunContext: Send + Sync {
    /// Read one value. `None` when the key is absent.
    fn get_value(&self, key: &str) -> Option<Value>;

    /// Report whether `set_value(key, ..)` would be accepted.
    /// Side effects: none.
    fn check_writable(&self, key: &str) -> Result<(), ContextError>;

    /// Store one value under `key`.
    fn set_value(&self, key: &str, value: Value) -> Result<(), ContextError>;
}

/// Mutable map context: every key is readable and writable.
#[derive(Debug, Default)]
pub struct MapContext {
    values: RwLock<Map<String, Value>>,
}

impl MapContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(values: Map<String, Value>) -> Self {
        Self {
            values: RwLock::new(values),
        }
    }

    /// Seed one value.
    /// Allocation: one key String. Complexity: O(log n).
    pub fn with_value(self, key: impl Into<String>, value: Value) -> Self {
        write_lock(&self.values).insert(key.into(), value);
        self
    }

    /// Copy of current contents.
    /// Allocation: O(n) clone. Complexity: O(n).
    pub fn snapshot(&self) -> Map<String, Value> {
        read_lock(&self.values).clone()
    }
}

impl RunContext for MapContext {
    fn get_value(&self, key: &str) -> Option<Value> {
        read_lock(&self.values).get(key).cloned()
    }

    fn check_writable(&self, _key: &str) -> Result<(), ContextError> {
        Ok(())
    }

    fn set_value(&self, key: &str, value: Value) -> Result<(), ContextError> {
        write_lock(&self.values).insert(key.to_owned(), value);
        Ok(())
    }
}

/// Immutable map context. Reads succeed, every write is rejected.
#[derive(Clone, Debug, Default)]
pub struct ReadOnlyContext {
    values: Map<String, Value>,
}

impl ReadOnlyContext {
    pub fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }
}

impl RunContext for ReadOnlyContext {
    fn get_value(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    fn check_writable(&self, _key: &str) -> Result<(), ContextError> {
        Err(ContextError::ReadOnly)
    }

    fn set_value(&self, _key: &str, _value: Value) -> Result<(), ContextError> {
        Err(ContextError::ReadOnly)
    }
}

/// Record context with a fixed set of declared fields.
///
/// Models typed host state: only declared fields can be written, and a frozen
/// record rejects every write. Undeclared fields read as absent.
#[derive(Debug)]
pub struct RecordContext {
    fields: RwLock<BTreeMap<String, Value>>,
    frozen: bool,
}

impl RecordContext {
    /// Declare fields, all initialised to `null`.
    /// Allocation: one String per field. Complexity: O(f log f).
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields = fields
            .into_iter()
            .map(|name| (name.into(), Value::Null))
            .collect();
        Self {
            fields: RwLock::new(fields),
            frozen: false,
        }
    }

    /// Declare (or overwrite) one field with an initial value.
    pub fn with_field(self, name: impl Into<String>, value: Value) -> Self {
        write_lock(&self.fields).insert(name.into(), value);
        self
    }

    /// Mark the record immutable.
    pub fn frozen(mut self) -> Self {
        self.frozen = true;
        self
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }
}

impl RunContext for RecordContext {
    fn get_value(&self, key: &str) -> Option<Value> {
        read_lock(&self.fields).get(key).cloned()
    }

    fn check_writable(&self, key: &str) -> Result<(), ContextError> {
        if self.frozen {
            return Err(ContextError::Frozen);
        }
        if !read_lock(&self.fields).contains_key(key) {
            return Err(ContextError::MissingField(key.to_owned()));
        }
        Ok(())
    }

    fn set_value(&self, key: &str, value: Value) -> Result<(), ContextError> {
        self.check_writable(key)?;
        write_lock(&self.fields).insert(key.to_owned(), value);
        Ok(())
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
