use super::backend::Notifications;

use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 16;

/// In-process fan-out of release announcements, one broadcast channel per lock
/// channel name. Both backends deliver through it; the Redis backend feeds it
/// from its single pub/sub connection.
#[derive(Default)]
pub struct Fanout {
    channels: DashMap<String, broadcast::Sender<()>>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// A stream yielding once per announcement on `channel` from now on.
    pub fn subscribe(&self, channel: &str) -> Notifications {
        let rx = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();

        futures::stream::unfold(rx, |mut rx| async move {
            match rx.recv().await {
                Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => Some(((), rx)),
                Err(broadcast::error::RecvError::Closed) => None,
            }
        })
        .boxed()
    }

    /// Announces on `channel`. Returns whether any subscriber was listening.
    pub fn notify(&self, channel: &str) -> bool {
        self.channels
            .get(channel)
            .is_some_and(|tx| tx.send(()).is_ok())
    }

    /// Drops `channel` if nobody listens to it any more. Returns whether it was dropped.
    pub fn prune(&self, channel: &str) -> bool {
        self.channels
            .remove_if(channel, |_, tx| tx.receiver_count() == 0)
            .is_some()
    }

    /// Number of channels with a live entry.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
