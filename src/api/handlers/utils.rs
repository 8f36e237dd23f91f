use axum::{
    extract::ConnectInfo,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use secrecy::ExposeSecret;
use std::net::SocketAddr;
use tracing::warn;

use crate::api::{LedgerState, ADMIN_TOKEN_HEADER};
use crate::ledger::scope::RequestContext;

pub(super) fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Remote address of the caller: proxy headers when trusted, else the socket peer.
pub(super) fn resolve_remote(
    state: &LedgerState,
    headers: &HeaderMap,
    peer: Option<&ConnectInfo<SocketAddr>>,
) -> Option<String> {
    if state.trust_proxy_headers {
        if let Some(remote) = extract_client_ip(headers) {
            return Some(remote);
        }
    }
    peer.map(|ConnectInfo(addr)| addr.ip().to_string())
}

pub(super) fn request_context(
    state: &LedgerState,
    headers: &HeaderMap,
    peer: Option<&ConnectInfo<SocketAddr>>,
) -> RequestContext {
    let ctx = RequestContext::new(resolve_remote(state, headers, peer));
    match headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
    {
        Some(request_id) => ctx.with_request_id(request_id),
        None => ctx,
    }
}

/// Gate for admin routes. Without a configured token the routes do not exist.
pub(super) fn require_admin(state: &LedgerState, headers: &HeaderMap) -> Result<(), Response> {
    let Some(expected) = &state.admin_token else {
        return Err((StatusCode::NOT_FOUND, "Not found".to_string()).into_response());
    };

    let presented = headers
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if tokens_match(presented.as_bytes(), expected.expose_secret().as_bytes()) {
        Ok(())
    } else {
        warn!("Rejected admin request with missing or invalid token");
        Err((StatusCode::UNAUTHORIZED, "Invalid admin token".to_string()).into_response())
    }
}

// Compares every byte regardless of where the first mismatch is.
fn tokens_match(presented: &[u8], expected: &[u8]) -> bool {
    if presented.len() != expected.len() || expected.is_empty() {
        return false;
    }
    presented
        .iter()
        .zip(expected)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn extract_client_ip_prefers_forwarded() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.2.3.4, 5.6.7.8"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(extract_client_ip(&headers), Some("1.2.3.4".to_string()));
    }

    #[test]
    fn extract_client_ip_falls_back_to_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(extract_client_ip(&headers), Some("9.9.9.9".to_string()));
    }

    #[test]
    fn extract_client_ip_none_when_missing() {
        let headers = HeaderMap::new();
        assert_eq!(extract_client_ip(&headers), None);
    }

    #[test]
    fn tokens_match_requires_equal_bytes() {
        assert!(tokens_match(b"s3cr3t", b"s3cr3t"));
        assert!(!tokens_match(b"s3cr3x", b"s3cr3t"));
        assert!(!tokens_match(b"s3cr3", b"s3cr3t"));
        assert!(!tokens_match(b"", b""));
    }
}
