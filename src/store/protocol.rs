//! Storage Node Protocol
//!
//! Endpoints and DTOs a storage node exposes for index records and object payloads.
//! Records travel as JSON; payloads travel as raw request/response bodies.

use crate::index::types::IndexRecord;
use serde::{Deserialize, Serialize};

// --- API Endpoints ---

/// Index records: `GET`/`DELETE` with `?key=`, `PUT` with the record as JSON body.
pub const ENDPOINT_META: &str = "/meta";
/// Object payloads: `/data/:source` for `GET`, `PUT` and `DELETE`.
pub const ENDPOINT_DATA: &str = "/data";

// --- Data Transfer Objects ---

/// Query string addressing one record on a node.
#[derive(Debug, Serialize, Deserialize)]
pub struct KeyQuery {
    pub key: String,
}

/// Response for record retrieval. `None` means the node holds no record for the key.
#[derive(Debug, Serialize, Deserialize)]
pub struct GetRecordResponse {
    pub record: Option<IndexRecord>,
}

/// Acknowledgment for record writes.
#[derive(Debug, Serialize, Deserialize)]
pub struct PutRecordResponse {
    pub success: bool,
}
