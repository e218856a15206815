use super::keys::common_prefix;
use crate::directory::types::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Identifier of an object payload on its storage node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SourceId(pub String);

impl SourceId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for SourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a child record lives: the storage node holding it and its full key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChildRoute {
    pub node_id: NodeId,
    pub key: String,
}

impl ChildRoute {
    pub fn new(node_id: NodeId, key: impl Into<String>) -> Self {
        Self {
            node_id,
            key: key.into(),
        }
    }
}

/// Payload location and attributes of an object stored at a trie position.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectMeta {
    pub node_id: NodeId,
    pub source: SourceId,
    pub size: u64,
    pub content_type: String,
    /// Epoch milliseconds.
    pub last_modified: u64,
}

/// One trie position, stored as a serialized blob at `(node_id, key)`.
///
/// Invariants maintained by the index:
/// - every child key has `key` as a strict prefix;
/// - `children` is sorted by key and no two children share a prefix longer than `key`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexRecord {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<ObjectMeta>,
    #[serde(default)]
    pub children: Vec<ChildRoute>,
}

impl IndexRecord {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            object: None,
            children: Vec::new(),
        }
    }

    /// `false` for pure routing records.
    pub fn has_object(&self) -> bool {
        self.object.is_some()
    }

    /// A routing record with exactly one child, which a merge folds away.
    pub fn is_pass_through(&self) -> bool {
        !self.has_object() && self.children.len() == 1
    }

    /// Index of the child whose key is a prefix of `target`.
    pub fn find_prefix(&self, target: &str) -> Option<usize> {
        self.children
            .iter()
            .position(|child| target.starts_with(child.key.as_str()))
    }

    /// Index of the child sharing a prefix with `target` longer than this record's
    /// key, together with that common prefix.
    pub fn find_matched<'t>(&self, target: &'t str) -> Option<(usize, &'t str)> {
        self.children.iter().enumerate().find_map(|(i, child)| {
            let matched = common_prefix(target, &child.key);
            (matched.len() > self.key.len()).then_some((i, matched))
        })
    }

    /// Position of the child entry for exactly `key`.
    pub fn child_index(&self, key: &str) -> Option<usize> {
        self.children.iter().position(|child| child.key == key)
    }

    /// Inserts `route` keeping `children` sorted by key.
    pub fn insert_child(&mut self, route: ChildRoute) {
        let index = self
            .children
            .partition_point(|child| child.key.as_str() <= route.key.as_str());
        self.children.insert(index, route);
    }

    pub fn remove_child(&mut self, index: usize) -> ChildRoute {
        self.children.remove(index)
    }

    /// Drops the object, keeping the children.
    pub fn clear_object(&mut self) -> Option<ObjectMeta> {
        self.object.take()
    }
}

/// Result of a prefix/delimiter listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListResult {
    pub common_prefixes: BTreeSet<String>,
    pub entries: Vec<IndexRecord>,
}

/// Current system time in epoch milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
