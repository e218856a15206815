//! Redis Lock Backend
//!
//! Lock state for `name` lives in two keys:
//! - `lock:{name}` holds the writer's token, with the write lease as its TTL;
//! - `lock:{name}:readers` holds the reader count, with the read lease as its TTL.
//!
//! Unlocks publish on the channel `lock:{name}`. Every acquire and unlock runs as a
//! Lua script so the check and the mutation are one atomic step on the server.
//!
//! All waiters of a process share one pub/sub connection. A dispatcher task hands each
//! message to the local `Fanout`; a channel nobody listens to any more is unsubscribed
//! when its next message arrives.

use super::backend::{LockBackend, Notifications};
use super::fanout::Fanout;
use super::types::{Acquire, LockToken, Release};
use crate::error::LockError;

use async_trait::async_trait;
use futures::StreamExt;
use redis::Script;
use redis::aio::{MultiplexedConnection, PubSubSink, PubSubStream};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;

/// Script result meaning "granted"; anything else is the blocking lease's PTTL.
const GRANTED: i64 = -10;

/// Wait used when the blocking key reports no usable TTL.
const MIN_RETRY: Duration = Duration::from_millis(50);

// KEYS[1] = write key, KEYS[2] = readers key, ARGV[1] = lease ms
const READ_LOCK: &str = r#"
if redis.call("EXISTS", KEYS[1]) == 1 then
    return redis.call("PTTL", KEYS[1])
end
redis.call("INCR", KEYS[2])
redis.call("PEXPIRE", KEYS[2], ARGV[1])
return -10
"#;

// KEYS[1] = write key (also the channel), KEYS[2] = readers key
const READ_UNLOCK: &str = r#"
if redis.call("EXISTS", KEYS[2]) == 0 then
    return -1
end
if redis.call("DECR", KEYS[2]) > 0 then
    return 1
end
redis.call("DEL", KEYS[2])
redis.call("PUBLISH", KEYS[1], "")
return 0
"#;

// KEYS[1] = write key, KEYS[2] = readers key, ARGV[1] = token, ARGV[2] = lease ms
const WRITE_LOCK: &str = r#"
if redis.call("EXISTS", KEYS[2]) == 1 then
    return redis.call("PTTL", KEYS[2])
end
if redis.call("SET", KEYS[1], ARGV[1], "NX", "PX", ARGV[2]) then
    return -10
end
return redis.call("PTTL", KEYS[1])
"#;

// KEYS[1] = write key (also the channel), ARGV[1] = token
const WRITE_UNLOCK: &str = r#"
if redis.call("GET", KEYS[1]) ~= ARGV[1] then
    return 0
end
redis.call("DEL", KEYS[1])
redis.call("PUBLISH", KEYS[1], "")
return 1
"#;

pub struct RedisLockBackend {
    conn: MultiplexedConnection,
    subscriptions: Arc<Subscriptions>,
    read_lock: Script,
    read_unlock: Script,
    write_lock: Script,
    write_unlock: Script,
}

impl RedisLockBackend {
    pub async fn connect(client: redis::Client) -> Result<Self, LockError> {
        let conn = client.get_multiplexed_async_connection().await?;
        let (sink, messages) = client.get_async_pubsub().await?.split();

        let subscriptions = Arc::new(Subscriptions {
            sink: Mutex::new(sink),
            fanout: Fanout::new(),
        });
        spawn_dispatcher(Arc::downgrade(&subscriptions), messages);

        Ok(Self {
            conn,
            subscriptions,
            read_lock: Script::new(READ_LOCK),
            read_unlock: Script::new(READ_UNLOCK),
            write_lock: Script::new(WRITE_LOCK),
            write_unlock: Script::new(WRITE_UNLOCK),
        })
    }
}

/// Channel subscriptions on the shared pub/sub connection.
///
/// Subscribing and pruning both hold `sink`, so a channel is never unsubscribed
/// while a new waiter is registering on it.
struct Subscriptions {
    sink: Mutex<PubSubSink>,
    fanout: Fanout,
}

impl Subscriptions {
    async fn subscribe(&self, channel: &str) -> Result<Notifications, LockError> {
        let mut sink = self.sink.lock().await;
        let notifications = self.fanout.subscribe(channel);
        sink.subscribe(channel).await?;
        Ok(notifications)
    }

    async fn prune(&self, channel: &str) -> Result<(), LockError> {
        let mut sink = self.sink.lock().await;
        if self.fanout.prune(channel) {
            sink.unsubscribe(channel).await?;
            tracing::trace!("Unsubscribed from '{}'", channel);
        }
        Ok(())
    }
}

fn spawn_dispatcher(subscriptions: Weak<Subscriptions>, mut messages: PubSubStream) {
    tokio::spawn(async move {
        while let Some(msg) = messages.next().await {
            let Some(subscriptions) = subscriptions.upgrade() else {
                return;
            };
            let channel = msg.get_channel_name().to_string();
            if subscriptions.fanout.notify(&channel) {
                continue;
            }

            tokio::spawn(async move {
                if let Err(e) = subscriptions.prune(&channel).await {
                    tracing::warn!("Failed to unsubscribe from '{}': {}", channel, e);
                }
            });
        }
        tracing::error!("Lock notification connection closed; waiters fall back to lease expiry");
    });
}

fn write_key(name: &str) -> String {
    format!("lock:{}", name)
}

fn readers_key(name: &str) -> String {
    format!("lock:{}:readers", name)
}

fn lease_ms(lease: Duration) -> u64 {
    (lease.as_millis() as u64).max(1)
}

/// Maps an acquire script reply to an `Acquire`.
pub(crate) fn decode_acquire(reply: i64) -> Acquire {
    match reply {
        GRANTED => Acquire::Granted,
        ttl if ttl > 0 => Acquire::Held {
            retry_after: Duration::from_millis(ttl as u64),
        },
        // -1 (no TTL) or -2 (expired between checks)
        _ => Acquire::Held {
            retry_after: MIN_RETRY,
        },
    }
}

#[async_trait]
impl LockBackend for RedisLockBackend {
    async fn subscribe(&self, name: &str) -> Result<Notifications, LockError> {
        self.subscriptions.subscribe(&write_key(name)).await
    }

    async fn try_read_lock(&self, name: &str, lease: Duration) -> Result<Acquire, LockError> {
        let mut conn = self.conn.clone();
        let reply: i64 = self
            .read_lock
            .key(write_key(name))
            .key(readers_key(name))
            .arg(lease_ms(lease))
            .invoke_async(&mut conn)
            .await?;
        Ok(decode_acquire(reply))
    }

    async fn read_unlock(&self, name: &str) -> Result<Release, LockError> {
        let mut conn = self.conn.clone();
        let reply: i64 = self
            .read_unlock
            .key(write_key(name))
            .key(readers_key(name))
            .invoke_async(&mut conn)
            .await?;
        Ok(if reply < 0 {
            Release::NotOwner
        } else {
            Release::Released
        })
    }

    async fn try_write_lock(
        &self,
        name: &str,
        token: &LockToken,
        lease: Duration,
    ) -> Result<Acquire, LockError> {
        let mut conn = self.conn.clone();
        let reply: i64 = self
            .write_lock
            .key(write_key(name))
            .key(readers_key(name))
            .arg(&token.0)
            .arg(lease_ms(lease))
            .invoke_async(&mut conn)
            .await?;
        Ok(decode_acquire(reply))
    }

    async fn write_unlock(&self, name: &str, token: &LockToken) -> Result<Release, LockError> {
        let mut conn = self.conn.clone();
        let reply: i64 = self
            .write_unlock
            .key(write_key(name))
            .arg(&token.0)
            .invoke_async(&mut conn)
            .await?;
        Ok(if reply == 1 {
            Release::Released
        } else {
            Release::NotOwner
        })
    }
}
