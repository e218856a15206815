//! Storage Node Health Monitor
//!
//! Periodically probes every registered node's health endpoint and removes the
//! nodes that fail, so placement stops choosing them.
//!
//! Records already placed on a removed node stay where they are; reads that reach
//! them fail until the node re-registers.

use super::NodeDirectory;
use super::protocol::ENDPOINT_HEALTH;
use super::types::NodeId;

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

pub struct HealthMonitor {
    directory: Arc<dyn NodeDirectory>,
    http_client: reqwest::Client,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(directory: Arc<dyn NodeDirectory>, interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            directory,
            http_client: reqwest::Client::new(),
            interval,
        })
    }

    /// Spawns the sweep loop and returns immediately.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tracing::info!("Starting health monitor (every {:?})", self.interval);

        tokio::spawn(async move {
            self.check_loop().await;
        })
    }

    async fn check_loop(&self) {
        let mut interval = tokio::time::interval(self.interval);
        // First tick fires immediately; give nodes a full period to register.
        interval.tick().await;

        loop {
            interval.tick().await;
            let removed = self.sweep().await;
            if !removed.is_empty() {
                tracing::warn!("Health sweep removed {} node(s)", removed.len());
            }
        }
    }

    /// Probes every registered node once and deregisters the unhealthy ones.
    /// Returns the ids that were removed.
    pub async fn sweep(&self) -> Vec<NodeId> {
        let node_ids = match self.directory.list_node_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!("Failed to list storage nodes: {}", e);
                return Vec::new();
            }
        };

        let mut removed = Vec::new();
        for node_id in node_ids {
            if let Err(e) = self.probe(&node_id).await {
                tracing::warn!("Node {} failed health check: {}", node_id, e);

                match self.directory.deregister(&node_id).await {
                    Ok(()) => removed.push(node_id),
                    Err(e) => tracing::error!("Failed to deregister node {}: {}", node_id, e),
                }
            } else {
                tracing::trace!("Node {} healthy", node_id);
            }
        }

        removed
    }

    async fn probe(&self, node_id: &NodeId) -> Result<()> {
        let host = self.directory.resolve_host(node_id).await?;

        let response = self
            .http_client
            .get(format!("http://{}{}", host, ENDPOINT_HEALTH))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("health probe answered {}", response.status()));
        }

        Ok(())
    }
}
