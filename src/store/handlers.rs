use super::local::LocalStore;
use super::protocol::{ENDPOINT_DATA, ENDPOINT_META, GetRecordResponse, KeyQuery, PutRecordResponse};
use crate::directory::handlers::handle_health;
use crate::directory::protocol::ENDPOINT_HEALTH;
use crate::index::types::{IndexRecord, SourceId};

use axum::{
    Extension, Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query},
    http::StatusCode,
    routing::get,
};
use std::sync::Arc;

pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Routes served by a storage node.
pub fn router(local: Arc<LocalStore>) -> Router {
    Router::new()
        .route(
            ENDPOINT_META,
            get(handle_get_record)
                .put(handle_put_record)
                .delete(handle_delete_record),
        )
        .route(
            &format!("{}/:source", ENDPOINT_DATA),
            get(handle_get_payload)
                .put(handle_put_payload)
                .delete(handle_delete_payload),
        )
        .route(ENDPOINT_HEALTH, get(handle_health))
        .layer(DefaultBodyLimit::max(MAX_PAYLOAD_BYTES))
        .layer(Extension(local))
}

pub async fn handle_get_record(
    Extension(local): Extension<Arc<LocalStore>>,
    Query(query): Query<KeyQuery>,
) -> (StatusCode, Json<GetRecordResponse>) {
    match local.get_record(&query.key) {
        Some(record) => (
            StatusCode::OK,
            Json(GetRecordResponse {
                record: Some(record),
            }),
        ),
        None => {
            tracing::debug!("Record '{}' not found", query.key);
            (
                StatusCode::NOT_FOUND,
                Json(GetRecordResponse { record: None }),
            )
        }
    }
}

pub async fn handle_put_record(
    Extension(local): Extension<Arc<LocalStore>>,
    Json(record): Json<IndexRecord>,
) -> (StatusCode, Json<PutRecordResponse>) {
    local.put_record(record);
    (StatusCode::OK, Json(PutRecordResponse { success: true }))
}

pub async fn handle_delete_record(
    Extension(local): Extension<Arc<LocalStore>>,
    Query(query): Query<KeyQuery>,
) -> StatusCode {
    if local.delete_record(&query.key) {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

pub async fn handle_get_payload(
    Extension(local): Extension<Arc<LocalStore>>,
    Path(source): Path<String>,
) -> (StatusCode, Bytes) {
    match local.get_payload(&SourceId(source)) {
        Some(payload) => (StatusCode::OK, payload),
        None => (StatusCode::NOT_FOUND, Bytes::new()),
    }
}

pub async fn handle_put_payload(
    Extension(local): Extension<Arc<LocalStore>>,
    Path(source): Path<String>,
    body: Bytes,
) -> StatusCode {
    local.put_payload(SourceId(source), body);
    StatusCode::OK
}

pub async fn handle_delete_payload(
    Extension(local): Extension<Arc<LocalStore>>,
    Path(source): Path<String>,
) -> StatusCode {
    if local.delete_payload(&SourceId(source)) {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}
