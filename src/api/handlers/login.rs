use axum::{
    extract::{ConnectInfo, Extension},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use tracing::{debug, error};
use utoipa::ToSchema;

use super::utils::request_context;
use crate::api::LedgerState;
use crate::ledger::{authenticator::Principal, error::AuthError, error::DenialReason};

#[derive(ToSchema, Deserialize)]
pub struct LoginRequest {
    pub login: String,
    #[schema(format = Password)]
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Denial {
    pub reason: DenialReason,
}

#[utoipa::path(
    post,
    path= "/v1/auth/login",
    request_body = LoginRequest,
    responses (
        (status = 200, description = "Credentials accepted", body = Principal),
        (status = 400, description = "Missing login or password"),
        (status = 401, description = "Credentials rejected", body = Denial),
        (status = 403, description = "Caller is not trusted right now", body = Denial),
        (status = 503, description = "Authentication backend unavailable")
    ),
    tag= "auth"
)]
pub async fn login(
    state: Extension<Arc<LedgerState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> Response {
    if request.login.trim().is_empty() || request.password.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            "Missing login or password".to_string(),
        )
            .into_response();
    }

    let ctx = request_context(&state, &headers, peer.as_ref());
    let password = SecretString::from(request.password);

    match state
        .authenticator
        .login(Some(&ctx), &request.login, &password)
        .await
    {
        Ok(principal) => (StatusCode::OK, Json(principal)).into_response(),
        Err(err) => auth_error_response(&err),
    }
}

fn auth_error_response(err: &AuthError) -> Response {
    match err {
        AuthError::Denied { reason } => {
            debug!("Login denied: {}", reason.as_str());
            let status = match reason {
                DenialReason::Failed => StatusCode::UNAUTHORIZED,
                DenialReason::Banned => StatusCode::FORBIDDEN,
            };
            (status, Json(Denial { reason: *reason })).into_response()
        }
        AuthError::Unavailable(message) => {
            error!("Login unavailable: {message}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Authentication temporarily unavailable".to_string(),
            )
                .into_response()
        }
    }
}
