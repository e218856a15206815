//! Directory Protocol
//!
//! Endpoints through which storage nodes join the directory and prove liveness.

use super::types::NodeInfo;
use serde::{Deserialize, Serialize};

/// Storage nodes announce themselves here on startup.
pub const ENDPOINT_REGISTER: &str = "/node/register";
/// Liveness probe served by every process.
pub const ENDPOINT_HEALTH: &str = "/health";

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub node: NodeInfo,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub success: bool,
}
