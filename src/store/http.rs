//! HTTP Record Store Client
//!
//! Resolves the storage node's address through the node directory on every call,
//! then talks to it over HTTP. Transport failures are retried with exponential
//! backoff and jitter; HTTP error statuses are not retried.

use super::RecordStore;
use super::protocol::{ENDPOINT_DATA, ENDPOINT_META, GetRecordResponse, KeyQuery};
use crate::directory::NodeDirectory;
use crate::directory::types::NodeId;
use crate::error::StoreError;
use crate::index::types::{IndexRecord, SourceId};

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const ATTEMPTS: usize = 3;

pub struct HttpRecordStore {
    directory: Arc<dyn NodeDirectory>,
    http_client: reqwest::Client,
}

impl HttpRecordStore {
    pub fn new(directory: Arc<dyn NodeDirectory>) -> Self {
        Self {
            directory,
            http_client: reqwest::Client::new(),
        }
    }

    async fn base_url(&self, node_id: &NodeId) -> Result<String, StoreError> {
        let host = self.directory.resolve_host(node_id).await?;
        Ok(format!("http://{}", host))
    }

    // --- HTTP Helpers with Backoff ---

    async fn send_with_retry<F>(&self, build: F) -> Result<reqwest::Response, StoreError>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let mut delay_ms = 150u64;
        let mut attempt = 0;

        loop {
            let response = build(&self.http_client)
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await;

            match response {
                Ok(resp) => return Ok(resp),
                Err(e) if attempt + 1 >= ATTEMPTS => return Err(StoreError::Transport(e)),
                Err(e) => {
                    attempt += 1;
                    tracing::debug!("Storage request failed (attempt {}): {}", attempt, e);
                    // Simple jitter to prevent thundering herd
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }
    }

    /// Maps a non-success status to `StoreError`, with 404 becoming `NotFound`.
    async fn check_status(
        node_id: &NodeId,
        what: String,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(what));
        }

        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Status {
            node: node_id.clone(),
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl RecordStore for HttpRecordStore {
    async fn get_record(&self, node_id: &NodeId, key: &str) -> Result<IndexRecord, StoreError> {
        let url = format!("{}{}", self.base_url(node_id).await?, ENDPOINT_META);
        let query = KeyQuery {
            key: key.to_string(),
        };

        let response = self
            .send_with_retry(|client| client.get(&url).query(&query))
            .await?;
        let what = format!("record '{}' on {}", key, node_id);
        let response = Self::check_status(node_id, what.clone(), response).await?;

        let body: GetRecordResponse = response.json().await?;
        body.record.ok_or(StoreError::NotFound(what))
    }

    async fn put_record(&self, node_id: &NodeId, record: &IndexRecord) -> Result<(), StoreError> {
        let url = format!("{}{}", self.base_url(node_id).await?, ENDPOINT_META);

        let response = self
            .send_with_retry(|client| client.put(&url).json(record))
            .await?;
        Self::check_status(node_id, format!("record '{}' on {}", record.key, node_id), response)
            .await?;

        tracing::trace!("Put record '{}' on {}", record.key, node_id);
        Ok(())
    }

    async fn delete_record(&self, node_id: &NodeId, key: &str) -> Result<(), StoreError> {
        let url = format!("{}{}", self.base_url(node_id).await?, ENDPOINT_META);
        let query = KeyQuery {
            key: key.to_string(),
        };

        let response = self
            .send_with_retry(|client| client.delete(&url).query(&query))
            .await?;
        match Self::check_status(node_id, format!("record '{}' on {}", key, node_id), response)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn get_payload(&self, node_id: &NodeId, source: &SourceId) -> Result<Bytes, StoreError> {
        let url = format!("{}{}/{}", self.base_url(node_id).await?, ENDPOINT_DATA, source);

        let response = self.send_with_retry(|client| client.get(&url)).await?;
        let response =
            Self::check_status(node_id, format!("payload {} on {}", source, node_id), response)
                .await?;

        Ok(response.bytes().await?)
    }

    async fn put_payload(
        &self,
        node_id: &NodeId,
        source: &SourceId,
        payload: Bytes,
    ) -> Result<(), StoreError> {
        let url = format!("{}{}/{}", self.base_url(node_id).await?, ENDPOINT_DATA, source);

        let response = self
            .send_with_retry(|client| client.put(&url).body(payload.clone()))
            .await?;
        Self::check_status(node_id, format!("payload {} on {}", source, node_id), response)
            .await?;

        tracing::trace!("Put payload {} ({} bytes) on {}", source, payload.len(), node_id);
        Ok(())
    }

    async fn delete_payload(&self, node_id: &NodeId, source: &SourceId) -> Result<(), StoreError> {
        let url = format!("{}{}/{}", self.base_url(node_id).await?, ENDPOINT_DATA, source);

        let response = self.send_with_retry(|client| client.delete(&url)).await?;
        match Self::check_status(node_id, format!("payload {} on {}", source, node_id), response)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}
