use super::RecordStore;
use super::local::LocalStore;
use crate::directory::types::NodeId;
use crate::error::StoreError;
use crate::index::types::{IndexRecord, SourceId};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use std::sync::Arc;

/// In-process record store: one `LocalStore` per storage node id.
///
/// Nodes can be marked unavailable, which makes every call against them fail the
/// way an unreachable storage node would.
#[derive(Default)]
pub struct MemoryRecordStore {
    nodes: DashMap<NodeId, Arc<LocalStore>>,
    unavailable: DashSet<NodeId>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The local store backing `node_id`, created on first use.
    pub fn node(&self, node_id: &NodeId) -> Arc<LocalStore> {
        self.nodes
            .entry(node_id.clone())
            .or_insert_with(|| Arc::new(LocalStore::new()))
            .clone()
    }

    pub fn set_unavailable(&self, node_id: &NodeId, unavailable: bool) {
        if unavailable {
            self.unavailable.insert(node_id.clone());
        } else {
            self.unavailable.remove(node_id);
        }
    }

    /// Every record across all nodes, with the node holding it, sorted by key.
    pub fn all_records(&self) -> Vec<(NodeId, IndexRecord)> {
        let mut all: Vec<(NodeId, IndexRecord)> = self
            .nodes
            .iter()
            .flat_map(|entry| {
                let node_id = entry.key().clone();
                entry
                    .value()
                    .records()
                    .into_iter()
                    .map(move |record| (node_id.clone(), record))
            })
            .collect();
        all.sort_by(|a, b| a.1.key.cmp(&b.1.key));
        all
    }

    pub fn payload_count(&self) -> usize {
        self.nodes
            .iter()
            .map(|entry| entry.value().payload_count())
            .sum()
    }

    fn reachable(&self, node_id: &NodeId) -> Result<Arc<LocalStore>, StoreError> {
        if self.unavailable.contains(node_id) {
            return Err(StoreError::Status {
                node: node_id.clone(),
                status: 503,
                body: "node unavailable".to_string(),
            });
        }
        Ok(self.node(node_id))
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get_record(&self, node_id: &NodeId, key: &str) -> Result<IndexRecord, StoreError> {
        self.reachable(node_id)?
            .get_record(key)
            .ok_or_else(|| StoreError::NotFound(format!("record '{}' on {}", key, node_id)))
    }

    async fn put_record(&self, node_id: &NodeId, record: &IndexRecord) -> Result<(), StoreError> {
        self.reachable(node_id)?.put_record(record.clone());
        Ok(())
    }

    async fn delete_record(&self, node_id: &NodeId, key: &str) -> Result<(), StoreError> {
        self.reachable(node_id)?.delete_record(key);
        Ok(())
    }

    async fn get_payload(&self, node_id: &NodeId, source: &SourceId) -> Result<Bytes, StoreError> {
        self.reachable(node_id)?
            .get_payload(source)
            .ok_or_else(|| StoreError::NotFound(format!("payload {} on {}", source, node_id)))
    }

    async fn put_payload(
        &self,
        node_id: &NodeId,
        source: &SourceId,
        payload: Bytes,
    ) -> Result<(), StoreError> {
        self.reachable(node_id)?.put_payload(source.clone(), payload);
        Ok(())
    }

    async fn delete_payload(&self, node_id: &NodeId, source: &SourceId) -> Result<(), StoreError> {
        self.reachable(node_id)?.delete_payload(source);
        Ok(())
    }
}
