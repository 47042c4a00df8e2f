//! HTTP request handlers

use super::types::{
    ErrorResponse, ListParams, ScanListResponse, StartScanRequest, StartScanResponse,
    SuccessResponse,
};
use super::AppState;
use crate::config::ScanOptions;
use crate::db::{DbError, Scan};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/scans", post(start_scan))
        .route("/api/scans", get(list_scans))
        .route("/api/scans/:uuid", get(get_scan))
        .route("/api/scans/:uuid", delete(delete_scan))
        .route("/api/queue/status", get(queue_status))
        .with_state(state)
}

/// Create the queued scan row and hand the scan to the executor.
async fn start_scan(
    State(state): State<AppState>,
    Json(request): Json<StartScanRequest>,
) -> Response {
    let options = ScanOptions {
        scan_type: request.scan_type.clone(),
        domain: request.domain.clone(),
        timeout: request.timeout,
        dry_run: request.dry_run,
        ..Default::default()
    };
    if let Err(e) = options.validate() {
        return error_response(StatusCode::BAD_REQUEST, e.to_string());
    }

    let uuid = uuid::Uuid::new_v4().to_string();
    let mut scan = Scan::new(&uuid, &request.scan_type, &request.domain);
    scan.sensitive_patterns = request.sensitive_patterns;
    if let Err(e) = state.db.save(&scan) {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }

    tracing::info!(scan = %uuid, scan_type = %request.scan_type, domain = %request.domain, "Scan enqueued");
    tokio::spawn(state.executor.clone().execute_scan(uuid.clone(), options));

    (
        StatusCode::ACCEPTED,
        Json(StartScanResponse {
            uuid,
            status: "queued".to_string(),
        }),
    )
        .into_response()
}

async fn list_scans(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Response {
    let result = match (params.page, params.limit) {
        (Some(page), limit) => state.db.list_paginated(page, limit.unwrap_or(20)),
        (None, Some(limit)) => state.db.list_paginated(1, limit),
        (None, None) => state.db.list(),
    };

    match result {
        Ok(scans) => Json(ScanListResponse {
            scans: scans
                .iter()
                .map(|s| serde_json::to_value(s).unwrap_or_default())
                .collect(),
        })
        .into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn get_scan(State(state): State<AppState>, Path(uuid): Path<String>) -> Response {
    match state.db.get_by_uuid(&uuid) {
        Ok(scan) => Json(scan).into_response(),
        Err(DbError::ScanNotFound(_)) => {
            error_response(StatusCode::NOT_FOUND, format!("scan not found: {uuid}"))
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn delete_scan(State(state): State<AppState>, Path(uuid): Path<String>) -> Response {
    match state.db.delete(&uuid) {
        Ok(()) => Json(SuccessResponse { success: true }).into_response(),
        Err(DbError::ScanNotFound(_)) => {
            error_response(StatusCode::NOT_FOUND, format!("scan not found: {uuid}"))
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn queue_status(State(state): State<AppState>) -> Response {
    Json(state.queue.status()).into_response()
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(ErrorResponse { error: message })).into_response()
}
