use super::protocol::{
    DEFAULT_CONTENT_TYPE, DeleteObjectResponse, ENDPOINT_API, ErrorResponse, ListQuery,
    ListResponse, ObjectSummary, PutObjectResponse,
};
use super::trie::NamespaceIndex;
use super::types::IndexRecord;
use crate::error::{IndexError, LockError};
use crate::metrics::{API_LATENCY, API_REQUESTS};
use crate::store::handlers::MAX_PAYLOAD_BYTES;

use axum::{
    Extension, Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use std::sync::Arc;
use tokio::time::Instant;

/// Object API routes, expecting an `Extension<Arc<NamespaceIndex>>` layer.
pub fn routes() -> Router {
    Router::new()
        .route(ENDPOINT_API, get(handle_list_objects))
        .route(
            &format!("{}/*key", ENDPOINT_API),
            get(handle_get_object)
                .head(handle_head_object)
                .put(handle_put_object)
                .post(handle_put_object)
                .delete(handle_delete_object),
        )
        .layer(DefaultBodyLimit::max(MAX_PAYLOAD_BYTES))
}

/// Object key for the captured path: the path below `/api`, with its leading slash.
fn object_key(path: &str) -> String {
    format!("/{}", path)
}

/// RFC 1123 date in GMT, as HTTP headers expect.
pub fn http_date(epoch_ms: u64) -> String {
    chrono::DateTime::from_timestamp_millis(epoch_ms as i64)
        .unwrap_or_default()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

fn status_for(err: &IndexError) -> StatusCode {
    match err {
        IndexError::NotFound(_) => StatusCode::NOT_FOUND,
        IndexError::InvalidKey { .. } => StatusCode::BAD_REQUEST,
        IndexError::Contended(_) => StatusCode::CONFLICT,
        IndexError::Lock(LockError::Timeout { .. }) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(key: &str, err: IndexError) -> Response {
    let status = status_for(&err);
    if status == StatusCode::NOT_FOUND {
        tracing::debug!("Object '{}' not found", key);
    } else {
        tracing::error!("Request for '{}' failed: {}", key, err);
    }

    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

/// Counts the response by operation and status and records its latency.
fn observe(op: &'static str, started: Instant, response: Response) -> Response {
    let status = response.status().as_u16().to_string();
    metrics::counter!(API_REQUESTS, "op" => op, "status" => status).increment(1);
    metrics::histogram!(API_LATENCY, "op" => op).record(started.elapsed().as_secs_f64());
    response
}

fn object_headers(record: &IndexRecord) -> Vec<(header::HeaderName, String)> {
    let Some(meta) = &record.object else {
        return Vec::new();
    };
    vec![
        (header::CONTENT_TYPE, meta.content_type.clone()),
        (header::CONTENT_LENGTH, meta.size.to_string()),
        (header::LAST_MODIFIED, http_date(meta.last_modified)),
    ]
}

fn with_headers(status: StatusCode, record: &IndexRecord, body: Bytes) -> Response {
    let mut response = (status, body).into_response();
    for (name, value) in object_headers(record) {
        match value.parse::<header::HeaderValue>() {
            Ok(value) => {
                response.headers_mut().insert(name, value);
            }
            Err(_) => tracing::warn!("Dropping unencodable {} header for '{}'", name, record.key),
        }
    }
    response
}

pub async fn handle_head_object(
    Extension(index): Extension<Arc<NamespaceIndex>>,
    Path(path): Path<String>,
) -> Response {
    let started = Instant::now();
    let key = object_key(&path);
    let response = match index.head(&key).await {
        Ok(record) => with_headers(StatusCode::OK, &record, Bytes::new()),
        Err(e) => error_response(&key, e),
    };
    observe("head", started, response)
}

pub async fn handle_get_object(
    Extension(index): Extension<Arc<NamespaceIndex>>,
    Path(path): Path<String>,
) -> Response {
    let started = Instant::now();
    let key = object_key(&path);
    let response = match index.get(&key).await {
        Ok((record, payload)) => with_headers(StatusCode::OK, &record, payload),
        Err(e) => error_response(&key, e),
    };
    observe("get", started, response)
}

pub async fn handle_put_object(
    Extension(index): Extension<Arc<NamespaceIndex>>,
    Path(path): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let started = Instant::now();
    let key = object_key(&path);
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_CONTENT_TYPE);

    let response = match index.put(&key, content_type, body).await {
        Ok(record) => {
            let size = record.object.as_ref().map_or(0, |meta| meta.size);
            tracing::info!("Stored '{}' ({} bytes)", key, size);
            (
                StatusCode::OK,
                Json(PutObjectResponse {
                    success: true,
                    key,
                    size,
                }),
            )
                .into_response()
        }
        Err(e) => error_response(&key, e),
    };
    observe("put", started, response)
}

pub async fn handle_delete_object(
    Extension(index): Extension<Arc<NamespaceIndex>>,
    Path(path): Path<String>,
) -> Response {
    let started = Instant::now();
    let key = object_key(&path);
    let response = match index.delete(&key).await {
        Ok(()) => (
            StatusCode::OK,
            Json(DeleteObjectResponse { success: true }),
        )
            .into_response(),
        Err(e) => error_response(&key, e),
    };
    observe("delete", started, response)
}

pub async fn handle_list_objects(
    Extension(index): Extension<Arc<NamespaceIndex>>,
    Query(query): Query<ListQuery>,
) -> Response {
    let started = Instant::now();
    let response = match index
        .list(&query.prefix, &query.delimiter, &query.after, query.limit)
        .await
    {
        Ok(listing) => (
            StatusCode::OK,
            Json(ListResponse {
                common_prefixes: listing.common_prefixes.into_iter().collect(),
                entries: listing
                    .entries
                    .iter()
                    .filter_map(ObjectSummary::from_record)
                    .collect(),
            }),
        )
            .into_response(),
        Err(e) => error_response(&query.prefix, e),
    };
    observe("list", started, response)
}
