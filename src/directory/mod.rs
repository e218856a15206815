//! Node Directory Module
//!
//! Maps logical storage-node ids to network addresses and decides where new trie
//! records and payloads are placed.
//!
//! ## Core Concepts
//! - **Registration**: Storage nodes announce `(id, host)` on startup (`handlers`).
//! - **Placement**: `assign_node` spreads new records round-robin across registered nodes.
//! - **Root discovery**: `find_or_create_root` probes every node for the root record and
//!   creates an empty one when no node serves it yet.
//! - **Health**: `HealthMonitor` deregisters nodes that stop answering their health probe.
//!
//! Two implementations share the `NodeDirectory` trait: `RedisDirectory` for a
//! multi-process deployment and `MemoryDirectory` for single-process runs and tests.

pub mod handlers;
pub mod health;
pub mod memory;
pub mod protocol;
pub mod remote;
pub mod types;


use crate::error::{DirectoryError, StoreError};
use crate::index::types::IndexRecord;
use crate::store::RecordStore;
use async_trait::async_trait;
use types::{NodeId, NodeInfo};

#[async_trait]
pub trait NodeDirectory: Send + Sync {
    /// Address (`host:port`) of a registered node.
    async fn resolve_host(&self, node_id: &NodeId) -> Result<String, DirectoryError>;

    /// Picks the node that should hold the next new record or payload.
    async fn assign_node(&self) -> Result<NodeId, DirectoryError>;

    /// All registered node ids, sorted.
    async fn list_node_ids(&self) -> Result<Vec<NodeId>, DirectoryError>;

    async fn register(&self, node: NodeInfo) -> Result<(), DirectoryError>;

    async fn deregister(&self, node_id: &NodeId) -> Result<(), DirectoryError>;
}

/// Returns the node that serves `root_key`, writing an empty root record on a
/// freshly assigned node when none of the registered nodes has one.
///
/// Nodes that fail to answer the probe are skipped, not treated as fatal.
pub async fn find_or_create_root(
    directory: &dyn NodeDirectory,
    store: &dyn RecordStore,
    root_key: &str,
) -> Result<NodeId, StoreError> {
    for node_id in directory.list_node_ids().await? {
        match store.get_record(&node_id, root_key).await {
            Ok(_) => {
                tracing::info!("Found root '{}' on node {}", root_key, node_id);
                return Ok(node_id);
            }
            Err(e) if e.is_not_found() => continue,
            Err(e) => {
                tracing::warn!("Failed to probe node {} for root: {}", node_id, e);
                continue;
            }
        }
    }

    let node_id = directory.assign_node().await?;
    store
        .put_record(&node_id, &IndexRecord::new(root_key))
        .await?;

    tracing::info!("Created root '{}' on node {}", root_key, node_id);
    Ok(node_id)
}

/// Round-robin pick over a sorted id list.
pub(crate) fn pick_round_robin(node_ids: &[NodeId], counter: usize) -> Option<NodeId> {
    if node_ids.is_empty() {
        return None;
    }
    Some(node_ids[counter % node_ids.len()].clone())
}
