use super::types::{Acquire, LockToken, Release};
use crate::error::LockError;

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::time::Duration;

/// Release announcements for one lock name. Each item means "a holder let go, retry now".
pub type Notifications = BoxStream<'static, ()>;

/// Atomic lock primitives of the shared coordination store.
///
/// State per name is a write token and a reader count, each with its own lease.
/// Every method is a single atomic step; the waiting loop lives in `RwMutex`.
#[async_trait]
pub trait LockBackend: Send + Sync {
    /// Subscribes to release announcements for `name`. Call before the first
    /// attempt so a release between attempt and wait is not missed.
    async fn subscribe(&self, name: &str) -> Result<Notifications, LockError>;

    /// Joins the readers unless a write token exists; refreshes the reader lease.
    async fn try_read_lock(&self, name: &str, lease: Duration) -> Result<Acquire, LockError>;

    /// Leaves the readers; the last reader out clears the count and announces it.
    async fn read_unlock(&self, name: &str) -> Result<Release, LockError>;

    /// Sets the write token unless readers or another token exist.
    async fn try_write_lock(
        &self,
        name: &str,
        token: &LockToken,
        lease: Duration,
    ) -> Result<Acquire, LockError>;

    /// Clears the write token and announces it, only if it still equals `token`.
    async fn write_unlock(&self, name: &str, token: &LockToken) -> Result<Release, LockError>;
}
