use super::backend::LockBackend;
use super::types::{Acquire, LockToken, Release};
use crate::config::LockConfig;
use crate::error::LockError;
use crate::metrics::{LOCK_OWNERSHIP_LOST, LOCK_TIMEOUTS, LOCK_WAIT};

use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;

/// Client handle for one named distributed read/write lock.
///
/// Waiting is event driven: the handle subscribes to the name's release channel
/// first, then alternates between an attempt and waiting for either a release
/// notification or the blocking lease to lapse, whichever comes first.
pub struct RwMutex {
    name: String,
    backend: Arc<dyn LockBackend>,
    config: LockConfig,
}

#[derive(Clone, Copy)]
enum Mode<'a> {
    Read,
    Write(&'a LockToken),
}

impl Mode<'_> {
    fn label(&self) -> &'static str {
        match self {
            Mode::Read => "read",
            Mode::Write(_) => "write",
        }
    }
}

impl RwMutex {
    pub fn new(name: impl Into<String>, backend: Arc<dyn LockBackend>, config: LockConfig) -> Self {
        Self {
            name: name.into(),
            backend,
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Blocks until a shared lease is held.
    pub async fn read(self: &Arc<Self>) -> Result<ReadGuard, LockError> {
        self.timed_acquire(Mode::Read).await?;
        tracing::trace!("Read lock '{}' acquired", self.name);

        Ok(ReadGuard {
            lock: self.clone(),
            armed: true,
        })
    }

    /// Blocks until the exclusive lease is held.
    pub async fn write(self: &Arc<Self>) -> Result<WriteGuard, LockError> {
        let token = LockToken::new();
        self.timed_acquire(Mode::Write(&token)).await?;
        tracing::trace!("Write lock '{}' acquired", self.name);

        Ok(WriteGuard {
            lock: self.clone(),
            token,
            armed: true,
        })
    }

    async fn timed_acquire(&self, mode: Mode<'_>) -> Result<(), LockError> {
        let started = Instant::now();
        let acquired = self.with_deadline(self.acquire(mode)).await;

        match &acquired {
            Ok(()) => metrics::histogram!(LOCK_WAIT, "mode" => mode.label())
                .record(started.elapsed().as_secs_f64()),
            Err(LockError::Timeout { .. }) => {
                metrics::counter!(LOCK_TIMEOUTS, "mode" => mode.label()).increment(1)
            }
            Err(_) => {}
        }
        acquired
    }

    async fn with_deadline<F>(&self, acquire: F) -> Result<(), LockError>
    where
        F: Future<Output = Result<(), LockError>>,
    {
        match self.config.acquire_timeout {
            Some(limit) => tokio::time::timeout(limit, acquire)
                .await
                .map_err(|_| LockError::Timeout {
                    name: self.name.clone(),
                })?,
            None => acquire.await,
        }
    }

    async fn acquire(&self, mode: Mode<'_>) -> Result<(), LockError> {
        let mut notifications = self.backend.subscribe(&self.name).await?;

        loop {
            let outcome = match mode {
                Mode::Read => {
                    self.backend
                        .try_read_lock(&self.name, self.config.lease)
                        .await?
                }
                Mode::Write(token) => {
                    self.backend
                        .try_write_lock(&self.name, token, self.config.lease)
                        .await?
                }
            };

            match outcome {
                Acquire::Granted => return Ok(()),
                Acquire::Held { retry_after } => {
                    tracing::trace!("Lock '{}' busy, waiting up to {:?}", self.name, retry_after);
                    tokio::select! {
                        Some(()) = notifications.next() => {}
                        _ = tokio::time::sleep(retry_after) => {}
                    }
                }
            }
        }
    }

    fn ownership_lost(&self) -> LockError {
        tracing::warn!("Lease on lock '{}' lapsed before release", self.name);
        metrics::counter!(LOCK_OWNERSHIP_LOST).increment(1);
        LockError::OwnershipLost {
            name: self.name.clone(),
        }
    }
}

/// A held shared lease. Release explicitly; a dropped guard lets the lease expire.
#[must_use = "a read lock must be released"]
pub struct ReadGuard {
    lock: Arc<RwMutex>,
    armed: bool,
}

impl ReadGuard {
    pub fn name(&self) -> &str {
        &self.lock.name
    }

    pub async fn release(mut self) -> Result<(), LockError> {
        self.armed = false;
        match self.lock.backend.read_unlock(&self.lock.name).await? {
            Release::Released => Ok(()),
            Release::NotOwner => Err(self.lock.ownership_lost()),
        }
    }
}

impl Drop for ReadGuard {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!("Read lock '{}' dropped unreleased", self.lock.name);
        }
    }
}

/// A held exclusive lease. Release explicitly; a dropped guard lets the lease expire.
#[must_use = "a write lock must be released"]
pub struct WriteGuard {
    lock: Arc<RwMutex>,
    token: LockToken,
    armed: bool,
}

impl WriteGuard {
    pub fn name(&self) -> &str {
        &self.lock.name
    }

    pub async fn release(mut self) -> Result<(), LockError> {
        self.armed = false;
        match self
            .lock
            .backend
            .write_unlock(&self.lock.name, &self.token)
            .await?
        {
            Release::Released => Ok(()),
            Release::NotOwner => Err(self.lock.ownership_lost()),
        }
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!("Write lock '{}' dropped unreleased", self.lock.name);
        }
    }
}
