use super::backend::LockBackend;
use super::mutex::{ReadGuard, RwMutex, WriteGuard};
use crate::config::LockConfig;
use crate::error::LockError;

use quick_cache::sync::{Cache, GuardResult};
use std::sync::Arc;

/// Bounded cache of lock handles keyed by lock name, evicting cold handles first.
///
/// A handle holds no lock state of its own, so evicting one never affects a
/// held lock; the guard keeps its handle alive and a later `get` builds a fresh one.
pub struct LockPool {
    backend: Arc<dyn LockBackend>,
    config: LockConfig,
    handles: Cache<String, Arc<RwMutex>>,
}

impl LockPool {
    pub fn new(backend: Arc<dyn LockBackend>, config: LockConfig) -> Self {
        let handles = Cache::new(config.pool_capacity.max(1));
        Self {
            backend,
            config,
            handles,
        }
    }

    /// Returns the cached handle for `name`, or builds and caches a new one.
    pub fn get(&self, name: &str) -> Arc<RwMutex> {
        match self.handles.get_value_or_guard(name, None) {
            GuardResult::Value(handle) => handle,
            GuardResult::Guard(placeholder) => {
                let handle = self.build(name);
                if placeholder.insert(handle.clone()).is_err() {
                    tracing::trace!("Lock handle '{}' not admitted to the pool", name);
                }
                handle
            }
            // No timeout was given; an uncached handle serializes the same way.
            GuardResult::Timeout => self.build(name),
        }
    }

    fn build(&self, name: &str) -> Arc<RwMutex> {
        Arc::new(RwMutex::new(name, self.backend.clone(), self.config.clone()))
    }

    pub async fn read(&self, name: &str) -> Result<ReadGuard, LockError> {
        self.get(name).read().await
    }

    pub async fn write(&self, name: &str) -> Result<WriteGuard, LockError> {
        self.get(name).write().await
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handles.peek(name).is_some()
    }
}
