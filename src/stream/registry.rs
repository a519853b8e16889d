use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinHandle;

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Process-scoped set of run ids known to have already ended.
///
/// Insert-only: a finished run never un-finishes, so entries are never
/// removed. Injected into the Transport Manager rather than held as a
/// true global, so tests get isolated instances.
#[derive(Debug, Clone, Default)]
pub struct NonRunningCache {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl NonRunningCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self, run_id: &str) {
        lock_unpoisoned(&self.inner).insert(run_id.to_string());
    }

    #[must_use]
    pub fn contains(&self, run_id: &str) -> bool {
        lock_unpoisoned(&self.inner).contains(run_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub(crate) struct ActiveConnection {
    pub cancel: Arc<AtomicBool>,
    pub task: JoinHandle<()>,
}

/// Per-run registry of live connections. At most one entry per run id.
#[derive(Clone, Default)]
pub(crate) struct ConnectionRegistry {
    inner: Arc<Mutex<HashMap<String, ActiveConnection>>>,
}

impl ConnectionRegistry {
    /// Tear down any live connection for `run_id`, synchronously.
    pub fn close(&self, run_id: &str) {
        if let Some(connection) = lock_unpoisoned(&self.inner).remove(run_id) {
            connection.cancel.store(true, Ordering::SeqCst);
            connection.task.abort();
        }
    }

    pub fn insert(&self, run_id: String, connection: ActiveConnection) {
        if let Some(previous) = lock_unpoisoned(&self.inner).insert(run_id, connection) {
            previous.cancel.store(true, Ordering::SeqCst);
            previous.task.abort();
        }
    }

    /// Remove the entry for `run_id` only if it still belongs to the
    /// connection identified by `cancel`. A newer connection that has
    /// replaced the entry is left untouched.
    pub fn remove_matching(&self, run_id: &str, cancel: &Arc<AtomicBool>) {
        let mut inner = lock_unpoisoned(&self.inner);
        let matches = inner
            .get(run_id)
            .map(|connection| Arc::ptr_eq(&connection.cancel, cancel))
            .unwrap_or(false);
        if matches {
            if let Some(connection) = inner.remove(run_id) {
                connection.cancel.store(true, Ordering::SeqCst);
                connection.task.abort();
            }
        }
    }

    pub fn is_live(&self, run_id: &str) -> bool {
        lock_unpoisoned(&self.inner).contains_key(run_id)
    }

    pub fn live_count(&self) -> usize {
        lock_unpoisoned(&self.inner).len()
    }
}
