//! Best-effort geolocation of remotes for attempt records.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::{net::IpAddr, time::Duration};
use tracing::{debug, instrument};
use url::Url;

use crate::APP_USER_AGENT;

pub const DEFAULT_GEO_URL: &str = "http://ip-api.com/json/";

#[async_trait]
pub trait GeoResolver: Send + Sync {
    async fn resolve(&self, remote: &str) -> Result<Value>;
}

/// Whether a remote may be sent to an external resolver.
///
/// Only globally routable addresses qualify; anything else (loopback, private
/// ranges, hostnames, labels like `demo`) stays local.
#[must_use]
pub fn is_resolvable(remote: &str) -> bool {
    match remote.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            !(ip.is_loopback()
                || ip.is_private()
                || ip.is_link_local()
                || ip.is_unspecified()
                || ip.is_broadcast()
                || ip.is_documentation()
                || ip.is_multicast())
        }
        Ok(IpAddr::V6(ip)) => {
            let unique_local = (ip.segments()[0] & 0xfe00) == 0xfc00;
            let link_local = (ip.segments()[0] & 0xffc0) == 0xfe80;
            !(ip.is_loopback() || ip.is_unspecified() || ip.is_multicast() || unique_local || link_local)
        }
        Err(_) => false,
    }
}

/// Resolver for ip-api.com compatible endpoints (`GET {base}{remote}`).
#[derive(Debug, Clone)]
pub struct IpApiResolver {
    client: Client,
    base_url: Url,
}

impl IpApiResolver {
    /// # Errors
    /// Returns an error if the base URL is invalid or the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self> {
        let mut base_url =
            Url::parse(base_url).with_context(|| format!("Invalid geolocation URL: {base_url}"))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(Duration::from_secs(3))
            .build()?;
        Ok(Self { client, base_url })
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn lookup_url(&self, remote: &str) -> Result<Url> {
        self.base_url
            .join(remote)
            .with_context(|| format!("Invalid remote for lookup: {remote}"))
    }
}

#[async_trait]
impl GeoResolver for IpApiResolver {
    #[instrument(skip(self))]
    async fn resolve(&self, remote: &str) -> Result<Value> {
        let url = self.lookup_url(remote)?;
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(anyhow!("geolocation lookup failed: {}", response.status()));
        }

        let body: Value = response.json().await?;
        interpret(body)
    }
}

/// ip-api reports lookup failures with `status: "fail"` and a 200 response.
fn interpret(body: Value) -> Result<Value> {
    match body.get("status").and_then(Value::as_str) {
        Some("fail") => {
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            Err(anyhow!("geolocation lookup failed: {message}"))
        }
        _ => {
            debug!("geolocation metadata: {body}");
            Ok(body)
        }
    }
}
