//! Stream status endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::connection_manager::ConnectionInfo;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct StreamListResponse {
    pub streams: Vec<ConnectionInfo>,
    pub total_streams: usize,
}

#[derive(Debug, Serialize)]
pub struct StreamErrorResponse {
    pub error: StreamApiError,
}

#[derive(Debug, Serialize)]
pub struct StreamApiError {
    pub code: String,
    pub message: String,
}

/// GET /streams - Snapshot of every registered stream
pub async fn list_streams(State(state): State<AppState>) -> Json<StreamListResponse> {
    let mut streams: Vec<ConnectionInfo> = state
        .manager
        .connection_ids()
        .iter()
        .filter_map(|id| state.manager.connection(id))
        .collect();
    streams.sort_by(|a, b| a.id.cmp(&b.id));
    let total = streams.len();

    Json(StreamListResponse {
        streams,
        total_streams: total,
    })
}

/// GET /streams/{id} - Snapshot of one stream
pub async fn get_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConnectionInfo>, (StatusCode, Json<StreamErrorResponse>)> {
    match state.manager.connection(&id) {
        Some(info) => Ok(Json(info)),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(StreamErrorResponse {
                error: StreamApiError {
                    code: "STREAM_NOT_FOUND".to_string(),
                    message: format!("Stream '{}' is not registered", id),
                },
            }),
        )),
    }
}
