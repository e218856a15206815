//! Redis-backed Node Directory
//!
//! Registered nodes live in a single hash (`id -> host`) in the coordination store,
//! so every namenode process sees the same membership.

use super::types::{NodeId, NodeInfo};
use super::{NodeDirectory, pick_round_robin};
use crate::error::DirectoryError;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use std::sync::atomic::{AtomicUsize, Ordering};

const NODES_KEY: &str = "storage:nodes";

pub struct RedisDirectory {
    conn: MultiplexedConnection,
    counter: AtomicUsize,
}

impl RedisDirectory {
    pub async fn connect(client: &redis::Client) -> Result<Self, DirectoryError> {
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            conn,
            counter: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl NodeDirectory for RedisDirectory {
    async fn resolve_host(&self, node_id: &NodeId) -> Result<String, DirectoryError> {
        let mut conn = self.conn.clone();
        let host: Option<String> = conn.hget(NODES_KEY, &node_id.0).await?;
        host.ok_or_else(|| DirectoryError::UnknownNode(node_id.clone()))
    }

    async fn assign_node(&self) -> Result<NodeId, DirectoryError> {
        let node_ids = self.list_node_ids().await?;
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        pick_round_robin(&node_ids, counter).ok_or(DirectoryError::NoNodes)
    }

    async fn list_node_ids(&self) -> Result<Vec<NodeId>, DirectoryError> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.hkeys(NODES_KEY).await?;
        let mut node_ids: Vec<NodeId> = ids.into_iter().map(NodeId).collect();
        node_ids.sort();
        Ok(node_ids)
    }

    async fn register(&self, node: NodeInfo) -> Result<(), DirectoryError> {
        let mut conn = self.conn.clone();
        let _: () = conn.hset(NODES_KEY, &node.id.0, &node.host).await?;
        tracing::info!("Registered storage node {} at {}", node.id, node.host);
        Ok(())
    }

    async fn deregister(&self, node_id: &NodeId) -> Result<(), DirectoryError> {
        let mut conn = self.conn.clone();
        let _: () = conn.hdel(NODES_KEY, &node_id.0).await?;
        tracing::info!("Deregistered storage node {}", node_id);
        Ok(())
    }
}
