use crate::directory::types::NodeId;
use crate::directory::{NodeDirectory, find_or_create_root};
use crate::error::IndexError;
use crate::lock::LockPool;
use crate::store::RecordStore;

use tokio::sync::RwLock;

/// Process-local cache of which storage node serves the root record.
///
/// Never authoritative: a miss (or an explicit invalidation after the root record
/// went missing) triggers rediscovery through the node directory.
pub struct RootCache {
    root_key: String,
    node: RwLock<Option<NodeId>>,
}

impl RootCache {
    pub fn new(root_key: impl Into<String>) -> Self {
        Self {
            root_key: root_key.into(),
            node: RwLock::new(None),
        }
    }

    pub async fn cached(&self) -> Option<NodeId> {
        self.node.read().await.clone()
    }

    /// Returns the root's node, discovering (or creating) it on a miss.
    ///
    /// Discovery runs under the root key's write lock so that concurrent processes
    /// agree on a single root record.
    pub async fn resolve(
        &self,
        directory: &dyn NodeDirectory,
        store: &dyn RecordStore,
        locks: &LockPool,
    ) -> Result<NodeId, IndexError> {
        if let Some(node_id) = self.node.read().await.clone() {
            return Ok(node_id);
        }

        let mut slot = self.node.write().await;
        if let Some(node_id) = slot.clone() {
            return Ok(node_id);
        }

        let guard = locks.write(&self.root_key).await?;
        let found = find_or_create_root(directory, store, &self.root_key).await;
        let released = guard.release().await;
        let node_id = found?;
        released?;

        *slot = Some(node_id.clone());
        Ok(node_id)
    }

    /// Forgets `stale` if it is still the cached root.
    pub async fn invalidate(&self, stale: &NodeId) {
        let mut slot = self.node.write().await;
        if slot.as_ref() == Some(stale) {
            tracing::info!("Invalidated cached root on node {}", stale);
            *slot = None;
        }
    }
}
