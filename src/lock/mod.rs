//! Lock Manager Module
//!
//! Per-name distributed read/write mutex over a shared coordination store.
//!
//! ## Core Concepts
//! - **Leases**: the write token and the reader count both expire, so a crashed holder
//!   blocks others for at most one lease.
//! - **Wake-ups**: unlocks publish on the lock's channel; waiters subscribe before their
//!   first attempt and retry on a notification or when the blocking lease lapses.
//! - **Ownership loss**: an unlock that finds its lease gone fails with
//!   `LockError::OwnershipLost` instead of succeeding quietly.
//! - **Handle pool**: `LockPool` caches `RwMutex` handles by name in a bounded
//!   `quick_cache` cache, evicting cold handles first.
//!   Handles carry no lock state, so evicting one never releases anything.
//!
//! `RedisLockBackend` is the production backend; `MemoryLockBackend` implements the
//! same semantics in process.

pub mod backend;
pub mod fanout;
pub mod memory;
pub mod mutex;
pub mod pool;
pub mod remote;
pub mod types;


pub use backend::{LockBackend, Notifications};
pub use fanout::Fanout;
pub use mutex::{ReadGuard, RwMutex, WriteGuard};
pub use pool::LockPool;
