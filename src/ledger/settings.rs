//! Key/value settings consumed by the trust evaluator.

use anyhow::Result;
use async_trait::async_trait;
use chrono::TimeDelta;
use std::{collections::HashMap, fmt, str::FromStr, sync::RwLock, time::Duration};
use tracing::warn;

pub const KEY_CHECK_REMOTE: &str = "tutela.check_remote";
pub const KEY_MAX_FAILURES: &str = "tutela.max_failures";
pub const KEY_MAX_FAILURES_BY_REMOTE: &str = "tutela.max_failures_by_remote";
pub const KEY_WINDOW_SECONDS: &str = "tutela.window_seconds";
pub const KEY_COUNT_SCOPE: &str = "tutela.count_scope";
pub const KEY_RESET_ON_SUCCESS: &str = "tutela.reset_on_success";
pub const KEY_WHITELIST_REMOTES: &str = "tutela.whitelist_remotes";

const DEFAULT_MAX_FAILURES: i64 = 10;
const DEFAULT_MAX_FAILURES_BY_REMOTE: i64 = 50;
const DEFAULT_WINDOW_SECONDS: u64 = 60 * 60;

#[async_trait]
pub trait SettingsProvider: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
}

/// In-memory settings, seeded from the command line.
#[derive(Debug, Default)]
pub struct StaticSettings {
    values: RwLock<HashMap<String, String>>,
}

impl StaticSettings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(self, key: &str, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&self, key: &str, value: impl Into<String>) {
        self.values
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(key.to_string(), value.into());
    }

    #[must_use]
    pub fn value(&self, key: &str) -> Option<String> {
        self.values
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(key)
            .cloned()
    }
}

#[async_trait]
impl SettingsProvider for StaticSettings {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.value(key))
    }
}

/// Which attempts the scoped failure limit counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CountScope {
    Remote,
    Login,
    #[default]
    RemoteLogin,
}

impl CountScope {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Remote => "remote",
            Self::Login => "login",
            Self::RemoteLogin => "remote_login",
        }
    }
}

impl fmt::Display for CountScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CountScope {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "remote" => Ok(Self::Remote),
            "login" => Ok(Self::Login),
            "remote_login" | "both" => Ok(Self::RemoteLogin),
            other => Err(format!("invalid count scope: {other}")),
        }
    }
}

/// Snapshot of every trust knob, read fresh for each decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustSettings {
    pub check_remote: bool,
    /// Scoped failure limit; 0 disables it.
    pub max_failures: i64,
    /// Per-remote ceiling regardless of login; 0 disables it.
    pub max_failures_by_remote: i64,
    pub window: Duration,
    pub count_scope: CountScope,
    pub reset_on_success: bool,
    pub whitelist_remotes: Vec<String>,
}

impl Default for TrustSettings {
    fn default() -> Self {
        Self {
            check_remote: true,
            max_failures: DEFAULT_MAX_FAILURES,
            max_failures_by_remote: DEFAULT_MAX_FAILURES_BY_REMOTE,
            window: Duration::from_secs(DEFAULT_WINDOW_SECONDS),
            count_scope: CountScope::default(),
            reset_on_success: true,
            whitelist_remotes: Vec::new(),
        }
    }
}

impl TrustSettings {
    /// Read every key from `provider`, keeping defaults for missing or invalid values.
    ///
    /// # Errors
    /// Returns an error if the provider itself fails.
    pub async fn load(provider: &dyn SettingsProvider) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            check_remote: parsed(provider, KEY_CHECK_REMOTE, defaults.check_remote, parse_bool)
                .await?,
            max_failures: parsed(provider, KEY_MAX_FAILURES, defaults.max_failures, |v| {
                v.parse::<i64>().ok().filter(|v| *v >= 0)
            })
            .await?,
            max_failures_by_remote: parsed(
                provider,
                KEY_MAX_FAILURES_BY_REMOTE,
                defaults.max_failures_by_remote,
                |v| v.parse::<i64>().ok().filter(|v| *v >= 0),
            )
            .await?,
            window: parsed(provider, KEY_WINDOW_SECONDS, defaults.window, |v| {
                v.parse::<u64>()
                    .ok()
                    .filter(|v| *v > 0 && window_representable(*v))
                    .map(Duration::from_secs)
            })
            .await?,
            count_scope: parsed(provider, KEY_COUNT_SCOPE, defaults.count_scope, |v| {
                v.parse().ok()
            })
            .await?,
            reset_on_success: parsed(
                provider,
                KEY_RESET_ON_SUCCESS,
                defaults.reset_on_success,
                parse_bool,
            )
            .await?,
            whitelist_remotes: parsed(
                provider,
                KEY_WHITELIST_REMOTES,
                defaults.whitelist_remotes,
                |v| Some(parse_list(v)),
            )
            .await?,
        })
    }

    #[must_use]
    pub fn remote_whitelisted(&self, remote: &str) -> bool {
        self.whitelist_remotes.iter().any(|entry| entry == remote)
    }
}

async fn parsed<T>(
    provider: &dyn SettingsProvider,
    key: &str,
    default: T,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<T> {
    let Some(raw) = provider.get(key).await? else {
        return Ok(default);
    };
    let raw = raw.trim();
    if let Some(value) = parse(raw) {
        Ok(value)
    } else {
        warn!("Ignoring invalid value for {key}: {raw:?}");
        Ok(default)
    }
}

/// The evaluator subtracts the window from the current time as a `TimeDelta`.
fn window_representable(seconds: u64) -> bool {
    i64::try_from(seconds)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .is_some()
}

/// Accepts the usual spellings, including the `True`/`False` written by other tools.
#[must_use]
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[must_use]
pub fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToString::to_string)
        .collect()
}
