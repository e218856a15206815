//! Record Store Module
//!
//! Moves serialized index records and object payloads to and from storage nodes.
//!
//! ## Core Concepts
//! - **Records**: one `IndexRecord` per trie position, addressed by `(NodeId, key)`.
//! - **Payloads**: raw object bytes, addressed by `(NodeId, SourceId)`.
//! - **Local store**: what a storage node keeps in process and serves over HTTP (`handlers`).
//! - **Clients**: `HttpRecordStore` talks to remote storage nodes through the node directory;
//!   `MemoryRecordStore` keeps one `LocalStore` per node id in process for tests and
//!   single-process runs.

pub mod handlers;
pub mod http;
pub mod local;
pub mod memory;
pub mod protocol;


use crate::directory::types::NodeId;
use crate::error::StoreError;
use crate::index::types::{IndexRecord, SourceId};

use async_trait::async_trait;
use bytes::Bytes;

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fails with `StoreError::NotFound` when the node holds no record for `key`.
    async fn get_record(&self, node_id: &NodeId, key: &str) -> Result<IndexRecord, StoreError>;

    /// Creates or overwrites the record at `(node_id, record.key)`.
    async fn put_record(&self, node_id: &NodeId, record: &IndexRecord) -> Result<(), StoreError>;

    /// Deleting an absent record succeeds.
    async fn delete_record(&self, node_id: &NodeId, key: &str) -> Result<(), StoreError>;

    async fn get_payload(&self, node_id: &NodeId, source: &SourceId) -> Result<Bytes, StoreError>;

    async fn put_payload(
        &self,
        node_id: &NodeId,
        source: &SourceId,
        payload: Bytes,
    ) -> Result<(), StoreError>;

    /// Deleting an absent payload succeeds.
    async fn delete_payload(&self, node_id: &NodeId, source: &SourceId) -> Result<(), StoreError>;
}
