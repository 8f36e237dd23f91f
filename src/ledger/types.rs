//! Records and value types shared by the ledger components.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use utoipa::ToSchema;
use uuid::Uuid;

use super::authenticator::normalize_login;

pub type AttemptId = Uuid;

/// Outcome of one authentication attempt.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AttemptResult {
    Pending,
    Successful,
    Failed,
    Banned,
}

impl AttemptResult {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Successful => "successful",
            Self::Failed => "failed",
            Self::Banned => "banned",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Results that count against a remote or login.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::Banned)
    }
}

impl fmt::Display for AttemptResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown attempt result: {0}")]
pub struct UnknownVariant(pub String);

impl FromStr for AttemptResult {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "successful" => Ok(Self::Successful),
            "failed" => Ok(Self::Failed),
            "banned" => Ok(Self::Banned),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// One row of the attempt ledger.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    #[schema(value_type = String, format = Uuid)]
    pub id: AttemptId,
    pub login: String,
    pub remote: String,
    pub created_at: DateTime<Utc>,
    pub result: AttemptResult,
    #[schema(value_type = Option<Object>)]
    pub remote_metadata: Option<serde_json::Value>,
}

/// Fields written by `update_result`, applied only while the record is pending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttemptUpdate {
    pub result: Option<AttemptResult>,
    pub login: Option<String>,
}

impl AttemptUpdate {
    #[must_use]
    pub fn result(result: AttemptResult) -> Self {
        Self {
            result: Some(result),
            login: None,
        }
    }

    #[must_use]
    pub fn login(login: impl Into<String>) -> Self {
        Self {
            result: None,
            login: Some(login.into()),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.result.is_none() && self.login.is_none()
    }
}

/// Failure counting query.
///
/// The time range is `(after, until]`: open on the old end, closed on the recent end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureQuery {
    pub remote: Option<String>,
    pub login: Option<String>,
    pub after: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

/// Admin listing filter, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AttemptFilter {
    pub remote: Option<String>,
    pub login: Option<String>,
    pub result: Option<AttemptResult>,
    pub limit: Option<u32>,
}

impl AttemptFilter {
    pub const DEFAULT_LIMIT: u32 = 100;
    pub const MAX_LIMIT: u32 = 1000;

    #[must_use]
    pub fn effective_limit(&self) -> u32 {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }

    #[must_use]
    pub fn matches(&self, record: &AttemptRecord) -> bool {
        self.remote.as_ref().map_or(true, |r| *r == record.remote)
            && self.login.as_ref().map_or(true, |l| *l == record.login)
            && self.result.map_or(true, |r| r == record.result)
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TrustListKind {
    Whitelist,
    Blacklist,
}

impl TrustListKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Whitelist => "whitelist",
            Self::Blacklist => "blacklist",
        }
    }
}

impl FromStr for TrustListKind {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "whitelist" => Ok(Self::Whitelist),
            "blacklist" => Ok(Self::Blacklist),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// What a trust list entry is keyed by.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TrustSubject {
    Remote(String),
    Login(String),
}

impl TrustSubject {
    #[must_use]
    pub const fn kind_str(&self) -> &'static str {
        match self {
            Self::Remote(_) => "remote",
            Self::Login(_) => "login",
        }
    }

    #[must_use]
    pub fn value(&self) -> &str {
        match self {
            Self::Remote(value) | Self::Login(value) => value,
        }
    }

    /// Rebuild a subject from its stored `(kind, value)` columns.
    ///
    /// # Errors
    /// Returns `UnknownVariant` if `kind` is neither `remote` nor `login`.
    pub fn from_parts(kind: &str, value: String) -> Result<Self, UnknownVariant> {
        match kind {
            "remote" => Ok(Self::Remote(value)),
            "login" => Ok(Self::Login(value)),
            other => Err(UnknownVariant(other.to_string())),
        }
    }

    /// Trimmed remote, or the login in the canonical form attempts are checked with.
    #[must_use]
    pub fn normalized(self) -> Self {
        match self {
            Self::Remote(value) => Self::Remote(value.trim().to_string()),
            Self::Login(value) => Self::Login(normalize_login(&value)),
        }
    }

    /// `login` is expected in canonical form.
    #[must_use]
    pub fn matches(&self, remote: Option<&str>, login: &str) -> bool {
        match self {
            Self::Remote(value) => remote == Some(value.as_str()),
            Self::Login(value) => normalize_login(value) == login,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TrustListEntry {
    pub id: Uuid,
    pub subject: TrustSubject,
    pub kind: TrustListKind,
    pub expires_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TrustListEntry {
    /// An entry without expiry never lapses; otherwise it is active up to `expires_at`.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expires_at| expires_at > now)
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NewTrustListEntry {
    pub subject: TrustSubject,
    pub kind: TrustListKind,
    pub expires_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn attempt_result_parses_its_own_labels() {
        for result in [
            AttemptResult::Pending,
            AttemptResult::Successful,
            AttemptResult::Failed,
            AttemptResult::Banned,
        ] {
            assert_eq!(result.as_str().parse::<AttemptResult>(), Ok(result));
        }
        assert!("unknown".parse::<AttemptResult>().is_err());
    }

    #[test]
    fn only_failed_and_banned_count_as_failures() {
        assert!(AttemptResult::Failed.is_failure());
        assert!(AttemptResult::Banned.is_failure());
        assert!(!AttemptResult::Successful.is_failure());
        assert!(!AttemptResult::Pending.is_failure());
        assert!(!AttemptResult::Pending.is_terminal());
    }

    #[test]
    fn trust_entry_expiry_is_exclusive() {
        let now = Utc::now();
        let mut entry = TrustListEntry {
            id: Uuid::now_v7(),
            subject: TrustSubject::Remote("203.0.113.5".to_string()),
            kind: TrustListKind::Whitelist,
            expires_at: None,
            note: None,
            created_at: now,
        };
        assert!(entry.is_active(now));

        entry.expires_at = Some(now);
        assert!(!entry.is_active(now));

        entry.expires_at = Some(now + Duration::seconds(1));
        assert!(entry.is_active(now));
    }

    #[test]
    fn subject_matches_remote_or_login() {
        let remote = TrustSubject::Remote("198.51.100.7".to_string());
        assert!(remote.matches(Some("198.51.100.7"), "alice"));
        assert!(!remote.matches(None, "alice"));

        let login = TrustSubject::Login("alice".to_string());
        assert!(login.matches(None, "alice"));
        assert!(!login.matches(Some("198.51.100.7"), "bob"));
    }

    #[test]
    fn subject_serializes_tagged() -> anyhow::Result<()> {
        let value = serde_json::to_value(TrustSubject::Login("alice".to_string()))?;
        assert_eq!(value, serde_json::json!({"type": "login", "value": "alice"}));
        Ok(())
    }

    #[test]
    fn filter_limit_is_clamped() {
        let filter = AttemptFilter {
            limit: Some(0),
            ..AttemptFilter::default()
        };
        assert_eq!(filter.effective_limit(), 1);
        let filter = AttemptFilter {
            limit: Some(5_000),
            ..AttemptFilter::default()
        };
        assert_eq!(filter.effective_limit(), AttemptFilter::MAX_LIMIT);
        assert_eq!(
            AttemptFilter::default().effective_limit(),
            AttemptFilter::DEFAULT_LIMIT
        );
    }

    #[test]
    fn stored_login_subjects_match_the_canonical_login() {
        let subject = TrustSubject::Login("Bob ".to_string());
        assert!(subject.matches(None, "bob"));
        assert_eq!(subject.normalized(), TrustSubject::Login("bob".to_string()));
        assert_eq!(
            TrustSubject::Remote(" 203.0.113.5 ".to_string()).normalized(),
            TrustSubject::Remote("203.0.113.5".to_string())
        );
    }
}
