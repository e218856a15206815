use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Value stored in the write-token key; identifies one write-lock holder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct LockToken(pub String);

impl LockToken {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for LockToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of one acquisition attempt against the coordination store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Granted,
    /// Someone else holds a conflicting lease; it lapses after `retry_after`
    /// unless released (and announced) earlier.
    Held { retry_after: Duration },
}

/// Outcome of an unlock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    Released,
    /// The lease lapsed and the stored state no longer belongs to this holder.
    NotOwner,
}
