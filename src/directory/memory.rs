use super::types::{NodeId, NodeInfo};
use super::{NodeDirectory, pick_round_robin};
use crate::error::DirectoryError;

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Process-local directory. Used when the namenode runs without a coordination
/// store, and by the tests.
#[derive(Default)]
pub struct MemoryDirectory {
    nodes: RwLock<BTreeMap<NodeId, String>>,
    counter: AtomicUsize,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience for tests: a directory pre-populated with `count` nodes
    /// named `node-0`, `node-1`, ...
    pub fn with_nodes(count: usize) -> Self {
        let directory = Self::new();
        {
            let mut nodes = directory.nodes.write();
            for i in 0..count {
                nodes.insert(NodeId(format!("node-{}", i)), format!("127.0.0.1:{}", 9000 + i));
            }
        }
        directory
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}

#[async_trait]
impl NodeDirectory for MemoryDirectory {
    async fn resolve_host(&self, node_id: &NodeId) -> Result<String, DirectoryError> {
        self.nodes
            .read()
            .get(node_id)
            .cloned()
            .ok_or_else(|| DirectoryError::UnknownNode(node_id.clone()))
    }

    async fn assign_node(&self) -> Result<NodeId, DirectoryError> {
        let node_ids = self.list_node_ids().await?;
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        pick_round_robin(&node_ids, counter).ok_or(DirectoryError::NoNodes)
    }

    async fn list_node_ids(&self) -> Result<Vec<NodeId>, DirectoryError> {
        Ok(self.nodes.read().keys().cloned().collect())
    }

    async fn register(&self, node: NodeInfo) -> Result<(), DirectoryError> {
        tracing::info!("Registered storage node {} at {}", node.id, node.host);
        self.nodes.write().insert(node.id, node.host);
        Ok(())
    }

    async fn deregister(&self, node_id: &NodeId) -> Result<(), DirectoryError> {
        if self.nodes.write().remove(node_id).is_some() {
            tracing::info!("Deregistered storage node {}", node_id);
        }
        Ok(())
    }
}
