use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{PersistError, PersistResult, StateStore};

#[derive(Debug, Default)]
struct Inner {
    initialized: bool,
    writes: Vec<String>,
    failing: Option<String>,
}

/// Store kept in process memory.
///
/// Clones share one write log, so a test can hand one clone to the state and
/// inspect every write through another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStateStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that already holds `data`, as if written by an earlier run.
    pub fn with_snapshot(data: impl Into<String>) -> Self {
        let store = Self::new();
        store.lock().writes.push(data.into());
        store
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every snapshot written so far, oldest first.
    pub fn writes(&self) -> Vec<String> {
        self.lock().writes.clone()
    }

    /// Most recent snapshot.
    pub fn last_write(&self) -> Option<String> {
        self.lock().writes.last().cloned()
    }

    /// Number of snapshots written.
    pub fn write_count(&self) -> usize {
        self.lock().writes.len()
    }

    /// True once `init` has run.
    pub fn is_initialized(&self) -> bool {
        self.lock().initialized
    }

    /// Makes every later `update` fail with `message`; `None` heals the store.
    pub fn set_failing(&self, message: Option<&str>) {
        self.lock().failing = message.map(str::to_string);
    }
}

impl StateStore for MemoryStateStore {
    fn init(&mut self) -> PersistResult<()> {
        self.lock().initialized = true;
        Ok(())
    }

    fn update(&mut self, data: &str) -> PersistResult<()> {
        let mut inner = self.lock();
        if let Some(message) = &inner.failing {
            return Err(PersistError::Message(message.clone()));
        }
        inner.writes.push(data.to_string());
        Ok(())
    }

    fn load(&mut self) -> PersistResult<Option<String>> {
        Ok(self.last_write())
    }
}
