use super::NodeDirectory;
use super::protocol::{RegisterRequest, RegisterResponse};

use axum::{Extension, Json, http::StatusCode};
use std::sync::Arc;

pub async fn handle_register(
    Extension(directory): Extension<Arc<dyn NodeDirectory>>,
    Json(req): Json<RegisterRequest>,
) -> (StatusCode, Json<RegisterResponse>) {
    if req.node.host.is_empty() {
        tracing::error!("Rejected registration of {} without host", req.node.id);
        return (
            StatusCode::BAD_REQUEST,
            Json(RegisterResponse { success: false }),
        );
    }

    match directory.register(req.node).await {
        Ok(()) => (StatusCode::OK, Json(RegisterResponse { success: true })),
        Err(e) => {
            tracing::error!("Failed to register node: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(RegisterResponse { success: false }),
            )
        }
    }
}

pub async fn handle_health() -> StatusCode {
    StatusCode::OK
}
