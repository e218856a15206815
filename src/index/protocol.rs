//! Object API Protocol
//!
//! Endpoints and DTOs of the namenode's public object API.

use super::types::IndexRecord;
use serde::{Deserialize, Serialize};

// --- API Endpoints ---

/// `GET` lists objects; `/api/*key` serves `HEAD`, `GET`, `PUT`, `POST` and `DELETE`.
pub const ENDPOINT_API: &str = "/api";

pub const DEFAULT_LIST_LIMIT: usize = 1000;
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain";

// --- Data Transfer Objects ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub delimiter: String,
    #[serde(default)]
    pub after: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    DEFAULT_LIST_LIMIT
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub content_type: String,
    /// Epoch milliseconds.
    pub last_modified: u64,
}

impl ObjectSummary {
    /// `None` for routing records without an object.
    pub fn from_record(record: &IndexRecord) -> Option<Self> {
        let meta = record.object.as_ref()?;
        Some(Self {
            key: record.key.clone(),
            size: meta.size,
            content_type: meta.content_type.clone(),
            last_modified: meta.last_modified,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse {
    pub common_prefixes: Vec<String>,
    pub entries: Vec<ObjectSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutObjectResponse {
    pub success: bool,
    pub key: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteObjectResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
