use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use super::utils::require_admin;
use crate::api::LedgerState;
use crate::ledger::types::{NewTrustListEntry, TrustListEntry};

fn internal_error(message: &str) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, message.to_string()).into_response()
}

#[utoipa::path(
    get,
    path= "/v1/trust",
    responses (
        (status = 200, description = "Trust list entries, newest first", body = [TrustListEntry]),
        (status = 401, description = "Invalid admin token"),
        (status = 404, description = "Admin routes disabled")
    ),
    tag= "admin"
)]
pub async fn list_entries(state: Extension<Arc<LedgerState>>, headers: HeaderMap) -> Response {
    if let Err(response) = require_admin(&state, &headers) {
        return response;
    }

    match state.trust_list.list().await {
        Ok(entries) => (StatusCode::OK, Json(entries)).into_response(),
        Err(err) => {
            error!("Failed to list trust entries: {err:#}");
            internal_error("Failed to list trust entries")
        }
    }
}

#[utoipa::path(
    post,
    path= "/v1/trust",
    request_body = NewTrustListEntry,
    responses (
        (status = 201, description = "Entry created", body = TrustListEntry),
        (status = 400, description = "Empty subject"),
        (status = 401, description = "Invalid admin token"),
        (status = 404, description = "Admin routes disabled")
    ),
    tag= "admin"
)]
pub async fn add_entry(
    state: Extension<Arc<LedgerState>>,
    headers: HeaderMap,
    Json(entry): Json<NewTrustListEntry>,
) -> Response {
    if let Err(response) = require_admin(&state, &headers) {
        return response;
    }

    if entry.subject.value().trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "Empty subject".to_string()).into_response();
    }

    match state.trust_list.add(entry).await {
        Ok(entry) => {
            info!(
                "Added {} entry for {} {}",
                entry.kind.as_str(),
                entry.subject.kind_str(),
                entry.subject.value()
            );
            (StatusCode::CREATED, Json(entry)).into_response()
        }
        Err(err) => {
            error!("Failed to add trust entry: {err:#}");
            internal_error("Failed to add trust entry")
        }
    }
}

#[utoipa::path(
    delete,
    path= "/v1/trust/{id}",
    params(("id" = Uuid, Path, description = "Trust list entry id")),
    responses (
        (status = 204, description = "Entry removed"),
        (status = 401, description = "Invalid admin token"),
        (status = 404, description = "Unknown entry or admin routes disabled")
    ),
    tag= "admin"
)]
pub async fn remove_entry(
    state: Extension<Arc<LedgerState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Response {
    if let Err(response) = require_admin(&state, &headers) {
        return response;
    }

    match state.trust_list.remove(id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => (StatusCode::NOT_FOUND, "Entry not found".to_string()).into_response(),
        Err(err) => {
            error!("Failed to remove trust entry {id}: {err:#}");
            internal_error("Failed to remove trust entry")
        }
    }
}
