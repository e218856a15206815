use super::backend::{LockBackend, Notifications};
use super::fanout::Fanout;
use super::types::{Acquire, LockToken, Release};
use crate::error::LockError;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Default)]
struct LockState {
    writer: Option<(LockToken, Instant)>,
    readers: Option<(u64, Instant)>,
}

impl LockState {
    /// Drops leases whose deadline passed.
    fn expire(&mut self, now: Instant) {
        if matches!(self.writer, Some((_, deadline)) if deadline <= now) {
            self.writer = None;
        }
        if matches!(self.readers, Some((_, deadline)) if deadline <= now) {
            self.readers = None;
        }
    }

    fn is_free(&self) -> bool {
        self.writer.is_none() && self.readers.is_none()
    }
}

/// Process-local coordination store with the same semantics as the Redis scripts.
///
/// Expiry is evaluated lazily: every lock attempt first drops all lapsed leases, so
/// state abandoned by a crashed holder does not outlive its lease by more than one call.
#[derive(Default)]
pub struct MemoryLockBackend {
    state: Mutex<HashMap<String, LockState>>,
    fanout: Fanout,
}

impl MemoryLockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn publish(&self, name: &str) {
        self.fanout.notify(name);
        self.fanout.prune(name);
    }

    /// Number of names with live lock state, for tests.
    pub fn active_locks(&self) -> usize {
        let mut state = self.state.lock();
        sweep(&mut state, Instant::now());
        state.len()
    }

    /// Number of names with an entry, lapsed or not.
    pub fn tracked_names(&self) -> usize {
        self.state.lock().len()
    }
}

/// Drops lapsed leases and forgets names left with none.
fn sweep(state: &mut HashMap<String, LockState>, now: Instant) {
    state.retain(|_, lock| {
        lock.expire(now);
        !lock.is_free()
    });
}

fn remaining(deadline: Instant, now: Instant) -> Duration {
    deadline.saturating_duration_since(now)
}

#[async_trait]
impl LockBackend for MemoryLockBackend {
    async fn subscribe(&self, name: &str) -> Result<Notifications, LockError> {
        Ok(self.fanout.subscribe(name))
    }

    async fn try_read_lock(&self, name: &str, lease: Duration) -> Result<Acquire, LockError> {
        let now = Instant::now();
        let mut state = self.state.lock();
        sweep(&mut state, now);
        let lock = state.entry(name.to_string()).or_default();

        if let Some((_, deadline)) = &lock.writer {
            return Ok(Acquire::Held {
                retry_after: remaining(*deadline, now),
            });
        }

        let count = lock.readers.as_ref().map_or(0, |(count, _)| *count);
        lock.readers = Some((count + 1, now + lease));
        Ok(Acquire::Granted)
    }

    async fn read_unlock(&self, name: &str) -> Result<Release, LockError> {
        let now = Instant::now();
        let released_last = {
            let mut state = self.state.lock();
            let Some(lock) = state.get_mut(name) else {
                return Ok(Release::NotOwner);
            };
            lock.expire(now);

            let Some((count, deadline)) = lock.readers else {
                return Ok(Release::NotOwner);
            };
            if count > 1 {
                lock.readers = Some((count - 1, deadline));
                false
            } else {
                lock.readers = None;
                if lock.is_free() {
                    state.remove(name);
                }
                true
            }
        };

        if released_last {
            self.publish(name);
        }
        Ok(Release::Released)
    }

    async fn try_write_lock(
        &self,
        name: &str,
        token: &LockToken,
        lease: Duration,
    ) -> Result<Acquire, LockError> {
        let now = Instant::now();
        let mut state = self.state.lock();
        sweep(&mut state, now);
        let lock = state.entry(name.to_string()).or_default();

        if let Some((_, deadline)) = &lock.readers {
            return Ok(Acquire::Held {
                retry_after: remaining(*deadline, now),
            });
        }
        if let Some((_, deadline)) = &lock.writer {
            return Ok(Acquire::Held {
                retry_after: remaining(*deadline, now),
            });
        }

        lock.writer = Some((token.clone(), now + lease));
        Ok(Acquire::Granted)
    }

    async fn write_unlock(&self, name: &str, token: &LockToken) -> Result<Release, LockError> {
        let now = Instant::now();
        {
            let mut state = self.state.lock();
            let Some(lock) = state.get_mut(name) else {
                return Ok(Release::NotOwner);
            };
            lock.expire(now);

            let owned = matches!(&lock.writer, Some((held, _)) if held == token);
            if !owned {
                return Ok(Release::NotOwner);
            }
            lock.writer = None;
            if lock.is_free() {
                state.remove(name);
            }
        }

        self.publish(name);
        Ok(Release::Released)
    }
}
