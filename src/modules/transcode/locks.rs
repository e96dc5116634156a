use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Registry = HashMap<String, Arc<AsyncMutex<()>>>;

/// Per-namespace mutual exclusion. Jobs sharing a `fileName` run one after
/// another; distinct namespaces never wait on each other.
#[derive(Clone, Default)]
pub struct NamespaceLocks {
    inner: Arc<Mutex<Registry>>,
}

/// Held for the whole lifetime of a job. Dropping it frees the namespace.
pub struct NamespaceGuard {
    key: String,
    registry: Arc<Mutex<Registry>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl NamespaceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &str) -> NamespaceGuard {
        let lock = {
            let mut registry = lock_registry(&self.inner);
            Arc::clone(registry.entry(key.to_string()).or_default())
        };
        let guard = lock.lock_owned().await;

        NamespaceGuard {
            key: key.to_string(),
            registry: Arc::clone(&self.inner),
            guard: Some(guard),
        }
    }

    /// Namespaces currently held or waited on.
    pub fn len(&self) -> usize {
        lock_registry(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for NamespaceGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut registry = lock_registry(&self.registry);
        // Only the registry's own reference left: nobody holds or waits.
        if registry
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            registry.remove(&self.key);
        }
    }
}

fn lock_registry(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
