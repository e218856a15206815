//! Error Taxonomy
//!
//! Every layer returns a typed error. `IndexError` is what trie callers see; it wraps
//! the collaborator errors unchanged so the underlying failure kind survives propagation.

use crate::directory::types::NodeId;
use thiserror::Error;

/// Failures raised by the distributed read/write lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// The coordination store rejected or failed a script / pub-sub call.
    #[error("coordination store error: {0}")]
    Coordination(#[from] redis::RedisError),

    /// The lease for `name` lapsed before unlock and ownership passed elsewhere.
    #[error("lock ownership lost for '{name}'")]
    OwnershipLost { name: String },

    /// The configured acquisition deadline elapsed.
    #[error("timed out acquiring lock '{name}'")]
    Timeout { name: String },
}

/// Failures raised by the record store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("storage node {node:?} answered {status}: {body}")]
    Status {
        node: NodeId,
        status: u16,
        body: String,
    },

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

/// Failures raised by the node directory.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("unknown storage node {0:?}")]
    UnknownNode(NodeId),

    #[error("no storage node registered")]
    NoNodes,

    #[error("coordination store error: {0}")]
    Coordination(#[from] redis::RedisError),
}

/// Failures surfaced by the namespace index.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("key not found: {0}")]
    NotFound(String),

    #[error("invalid key '{key}': must start with root key '{root}'")]
    InvalidKey { key: String, root: String },

    /// The cached root location no longer serves the root record.
    #[error("root record missing on node {0:?}")]
    RootMissing(NodeId),

    /// The path to `key` kept being restructured underneath the operation.
    #[error("gave up on '{0}' after repeated concurrent restructuring")]
    Contended(String),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

impl From<StoreError> for IndexError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => IndexError::NotFound(what),
            other => IndexError::Store(other),
        }
    }
}

impl IndexError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, IndexError::NotFound(_))
    }
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}
