//! HTTP surface: login, health, and the admin routes over the attempt ledger
//! and the trust list.

use crate::ledger::{
    authenticator::Authenticator,
    geo::IpApiResolver,
    pg::{PgAttemptStore, PgCredentialVerifier, PgSettings, PgTrustList},
    settings::StaticSettings,
    store::AttemptStore,
    tracker::AttemptTracker,
    trust::TrustEvaluator,
    trust_list::TrustListStore,
};
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    routing::{delete, get, post},
    Extension, Router,
};
use secrecy::SecretString;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;

pub mod handlers;
mod openapi;

pub use openapi::openapi;

pub const ADMIN_TOKEN_HEADER: &str = "x-tutela-admin-token";

/// Everything the handlers share.
pub struct LedgerState {
    pub authenticator: Authenticator,
    pub attempts: Arc<dyn AttemptStore>,
    pub trust_list: Arc<dyn TrustListStore>,
    pub pool: Option<PgPool>,
    pub trust_proxy_headers: bool,
    pub admin_token: Option<SecretString>,
}

impl LedgerState {
    #[must_use]
    pub fn new(
        authenticator: Authenticator,
        attempts: Arc<dyn AttemptStore>,
        trust_list: Arc<dyn TrustListStore>,
    ) -> Self {
        Self {
            authenticator,
            attempts,
            trust_list,
            pool: None,
            trust_proxy_headers: false,
            admin_token: None,
        }
    }

    #[must_use]
    pub fn with_pool(mut self, pool: PgPool) -> Self {
        self.pool = Some(pool);
        self
    }

    #[must_use]
    pub fn with_proxy_headers(mut self, trust: bool) -> Self {
        self.trust_proxy_headers = trust;
        self
    }

    #[must_use]
    pub fn with_admin_token(mut self, token: Option<SecretString>) -> Self {
        self.admin_token = token;
        self
    }
}

#[derive(Debug)]
pub struct ServerOptions {
    pub geo_url: Option<String>,
    pub trust_proxy_headers: bool,
    pub admin_token: Option<SecretString>,
}

/// Build the router over `state`.
#[must_use]
pub fn router(state: Arc<LedgerState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/openapi.json", get(handlers::health::openapi_json))
        .route("/v1/auth/login", post(handlers::login::login))
        .route("/v1/attempts", get(handlers::attempts::list_attempts))
        .route(
            "/v1/attempts/:id/whitelist",
            post(handlers::attempts::whitelist_attempt),
        )
        .route(
            "/v1/trust",
            get(handlers::trust::list_entries).post(handlers::trust::add_entry),
        )
        .route("/v1/trust/:id", delete(handlers::trust::remove_entry))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(state)),
        )
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(
    port: u16,
    dsn: String,
    defaults: StaticSettings,
    options: ServerOptions,
) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    let attempts: Arc<dyn AttemptStore> = Arc::new(PgAttemptStore::new(pool.clone()));
    let trust_list: Arc<dyn TrustListStore> = Arc::new(PgTrustList::new(pool.clone()));
    let settings = Arc::new(PgSettings::new(pool.clone(), defaults));

    let mut tracker = AttemptTracker::new(attempts.clone());
    if let Some(geo_url) = &options.geo_url {
        tracker = tracker.with_geo_resolver(Arc::new(IpApiResolver::new(geo_url)?));
    }

    let evaluator = Arc::new(TrustEvaluator::new(
        attempts.clone(),
        trust_list.clone(),
        settings,
    ));
    let authenticator = Authenticator::new(
        tracker,
        evaluator,
        Arc::new(PgCredentialVerifier::new(pool.clone())),
    );

    let state = LedgerState::new(authenticator, attempts, trust_list)
        .with_pool(pool)
        .with_proxy_headers(options.trust_proxy_headers)
        .with_admin_token(options.admin_token);

    let app = router(Arc::new(state));

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Gracefully shutdown");
        }
    })
    .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
