use axum::{
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use super::utils::require_admin;
use crate::api::LedgerState;
use crate::ledger::types::{AttemptFilter, AttemptRecord, TrustListEntry};

#[utoipa::path(
    get,
    path= "/v1/attempts",
    params(AttemptFilter),
    responses (
        (status = 200, description = "Attempts, newest first", body = [AttemptRecord]),
        (status = 401, description = "Invalid admin token"),
        (status = 404, description = "Admin routes disabled")
    ),
    tag= "admin"
)]
pub async fn list_attempts(
    state: Extension<Arc<LedgerState>>,
    headers: HeaderMap,
    Query(filter): Query<AttemptFilter>,
) -> Response {
    if let Err(response) = require_admin(&state, &headers) {
        return response;
    }

    match state.attempts.list(&filter).await {
        Ok(records) => (StatusCode::OK, Json(records)).into_response(),
        Err(err) => {
            error!("Failed to list attempts: {err:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to list attempts".to_string(),
            )
                .into_response()
        }
    }
}

#[utoipa::path(
    post,
    path= "/v1/attempts/{id}/whitelist",
    params(("id" = Uuid, Path, description = "Attempt id")),
    responses (
        (status = 201, description = "Remote of the attempt whitelisted", body = TrustListEntry),
        (status = 401, description = "Invalid admin token"),
        (status = 404, description = "Unknown attempt or admin routes disabled")
    ),
    tag= "admin"
)]
pub async fn whitelist_attempt(
    state: Extension<Arc<LedgerState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Response {
    if let Err(response) = require_admin(&state, &headers) {
        return response;
    }

    match state
        .authenticator
        .evaluator()
        .whitelist_attempt_remote(id)
        .await
    {
        Ok(Some(entry)) => {
            info!("Whitelisted {} from attempt {id}", entry.subject.value());
            (StatusCode::CREATED, Json(entry)).into_response()
        }
        Ok(None) => (StatusCode::NOT_FOUND, "Attempt not found".to_string()).into_response(),
        Err(err) => {
            error!("Failed to whitelist attempt {id}: {err:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to whitelist attempt".to_string(),
            )
                .into_response()
        }
    }
}
