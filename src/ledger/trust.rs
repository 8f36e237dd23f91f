//! Trust decision over attempt history and the trust list.
//!
//! Rules, first match wins:
//! 1) remote checking disabled: trusted
//! 2) remote or login blacklisted: untrusted
//! 3) remote or login whitelisted (trust list or `whitelist_remotes` setting): trusted
//! 4) recent failures at or over a limit: untrusted
//!
//! Two limits apply independently. The scoped limit counts failures matching
//! the configured count scope; the remote ceiling counts every failure from the
//! remote whatever the login. With `reset_on_success` only failures after the
//! latest success in the same scope count.
//!
//! Counting reads a snapshot without locking, so concurrent attempts for the
//! same pair may all be admitted while the count is still below the limit.

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::settings::{CountScope, SettingsProvider, TrustSettings};
use super::store::AttemptStore;
use super::trust_list::TrustListStore;
use super::types::{
    AttemptId, FailureQuery, NewTrustListEntry, TrustListEntry, TrustListKind, TrustSubject,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustDecision {
    CheckDisabled,
    Blacklisted(TrustSubject),
    Whitelisted,
    WithinLimits,
    LimitReached {
        scope: LimitScope,
        count: i64,
        max: i64,
    },
}

impl TrustDecision {
    #[must_use]
    pub const fn is_trusted(&self) -> bool {
        matches!(
            self,
            Self::CheckDisabled | Self::Whitelisted | Self::WithinLimits
        )
    }
}

/// Which limit tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitScope {
    Scoped(CountScope),
    Remote,
}

pub struct TrustEvaluator {
    attempts: Arc<dyn AttemptStore>,
    trust_list: Arc<dyn TrustListStore>,
    settings: Arc<dyn SettingsProvider>,
}

impl TrustEvaluator {
    #[must_use]
    pub fn new(
        attempts: Arc<dyn AttemptStore>,
        trust_list: Arc<dyn TrustListStore>,
        settings: Arc<dyn SettingsProvider>,
    ) -> Self {
        Self {
            attempts,
            trust_list,
            settings,
        }
    }

    /// Is `(remote, login)` trusted right now?
    ///
    /// # Errors
    /// Returns an error if settings, the trust list or the attempt store cannot be read.
    pub async fn is_trusted(&self, remote: &str, login: &str) -> Result<bool> {
        Ok(self.evaluate(remote, login, Utc::now()).await?.is_trusted())
    }

    /// # Errors
    /// Returns an error if settings, the trust list or the attempt store cannot be read.
    #[instrument(skip(self))]
    pub async fn evaluate(
        &self,
        remote: &str,
        login: &str,
        now: DateTime<Utc>,
    ) -> Result<TrustDecision> {
        let settings = TrustSettings::load(self.settings.as_ref())
            .await
            .context("failed to load trust settings")?;

        if !settings.check_remote {
            return Ok(TrustDecision::CheckDisabled);
        }

        let entries = self
            .trust_list
            .active_matches(Some(remote), login, now)
            .await
            .context("failed to read trust list")?;

        if let Some(entry) = entries
            .iter()
            .find(|entry| entry.kind == TrustListKind::Blacklist)
        {
            debug!("{} {} is blacklisted", entry.subject.kind_str(), entry.subject.value());
            return Ok(TrustDecision::Blacklisted(entry.subject.clone()));
        }

        if settings.remote_whitelisted(remote)
            || entries
                .iter()
                .any(|entry| entry.kind == TrustListKind::Whitelist)
        {
            return Ok(TrustDecision::Whitelisted);
        }

        let window = TimeDelta::from_std(settings.window).context("trust window out of range")?;
        let window_start = now
            .checked_sub_signed(window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        if settings.max_failures > 0 {
            let (scoped_remote, scoped_login) = match settings.count_scope {
                CountScope::Remote => (Some(remote), None),
                CountScope::Login => (None, Some(login)),
                CountScope::RemoteLogin => (Some(remote), Some(login)),
            };
            let count = self
                .recent_failures(&settings, scoped_remote, scoped_login, window_start, now)
                .await?;
            if count >= settings.max_failures {
                warn!(
                    "Failure limit reached for {} ({count}/{})",
                    settings.count_scope, settings.max_failures
                );
                return Ok(TrustDecision::LimitReached {
                    scope: LimitScope::Scoped(settings.count_scope),
                    count,
                    max: settings.max_failures,
                });
            }
        }

        if settings.max_failures_by_remote > 0 {
            let count = self
                .recent_failures(&settings, Some(remote), None, window_start, now)
                .await?;
            if count >= settings.max_failures_by_remote {
                warn!(
                    "Remote failure ceiling reached ({count}/{})",
                    settings.max_failures_by_remote
                );
                return Ok(TrustDecision::LimitReached {
                    scope: LimitScope::Remote,
                    count,
                    max: settings.max_failures_by_remote,
                });
            }
        }

        Ok(TrustDecision::WithinLimits)
    }

    async fn recent_failures(
        &self,
        settings: &TrustSettings,
        remote: Option<&str>,
        login: Option<&str>,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let mut after = window_start;
        if settings.reset_on_success {
            let last_success = self
                .attempts
                .last_success(remote, login, now)
                .await
                .context("failed to read last successful attempt")?;
            if let Some(last_success) = last_success {
                after = after.max(last_success);
            }
        }

        self.attempts
            .count_failures(&FailureQuery {
                remote: remote.map(ToString::to_string),
                login: login.map(ToString::to_string),
                after,
                until: now,
            })
            .await
            .context("failed to count failed attempts")
    }

    /// Whitelist the remote of a recorded attempt, without expiry.
    ///
    /// Returns `None` if the attempt does not exist.
    ///
    /// # Errors
    /// Returns an error if the attempt store or trust list fails.
    pub async fn whitelist_attempt_remote(
        &self,
        attempt_id: AttemptId,
    ) -> Result<Option<TrustListEntry>> {
        let Some(attempt) = self.attempts.get(attempt_id).await? else {
            return Ok(None);
        };
        let entry = self
            .trust_list
            .add(NewTrustListEntry {
                subject: TrustSubject::Remote(attempt.remote),
                kind: TrustListKind::Whitelist,
                expires_at: None,
                note: Some(format!("whitelisted from attempt {attempt_id}")),
            })
            .await?;
        Ok(Some(entry))
    }
}
