use crate::index::types::{IndexRecord, SourceId};

use bytes::Bytes;
use dashmap::DashMap;

/// Records and payloads held by a single storage node.
///
/// Structure: `key -> IndexRecord` and `SourceId -> bytes`, both `DashMap`s so the
/// HTTP handlers can serve concurrent requests without a global lock.
#[derive(Default)]
pub struct LocalStore {
    records: DashMap<String, IndexRecord>,
    payloads: DashMap<SourceId, Bytes>,
}

impl LocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_record(&self, key: &str) -> Option<IndexRecord> {
        self.records.get(key).map(|entry| entry.value().clone())
    }

    pub fn put_record(&self, record: IndexRecord) {
        tracing::debug!("Stored record '{}'", record.key);
        self.records.insert(record.key.clone(), record);
    }

    /// Returns whether a record was removed.
    pub fn delete_record(&self, key: &str) -> bool {
        let removed = self.records.remove(key).is_some();
        if removed {
            tracing::debug!("Deleted record '{}'", key);
        }
        removed
    }

    pub fn get_payload(&self, source: &SourceId) -> Option<Bytes> {
        self.payloads.get(source).map(|entry| entry.value().clone())
    }

    pub fn put_payload(&self, source: SourceId, payload: Bytes) {
        tracing::debug!("Stored payload {} ({} bytes)", source, payload.len());
        self.payloads.insert(source, payload);
    }

    /// Returns whether a payload was removed.
    pub fn delete_payload(&self, source: &SourceId) -> bool {
        self.payloads.remove(source).is_some()
    }

    /// Snapshot of every record, sorted by key.
    pub fn records(&self) -> Vec<IndexRecord> {
        let mut records: Vec<IndexRecord> = self
            .records
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        records
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn payload_count(&self) -> usize {
        self.payloads.len()
    }
}
