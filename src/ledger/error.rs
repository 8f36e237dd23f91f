//! Errors surfaced to callers and internal tracking failures.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::types::AttemptResult;

/// Why a login was refused.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// Bad credentials.
    #[default]
    Failed,
    /// The remote/login pair is not trusted right now.
    Banned,
}

impl DenialReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Failed => "failed",
            Self::Banned => "banned",
        }
    }
}

impl From<DenialReason> for AttemptResult {
    fn from(reason: DenialReason) -> Self {
        match reason {
            DenialReason::Failed => Self::Failed,
            DenialReason::Banned => Self::Banned,
        }
    }
}

/// Outcome errors of an authentication call. This is the only error type that
/// reaches the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("access denied ({})", reason.as_str())]
    Denied { reason: DenialReason },
    #[error("authentication backend unavailable: {0}")]
    Unavailable(String),
}

impl AuthError {
    /// Denial with the default `failed` reason.
    #[must_use]
    pub const fn denied() -> Self {
        Self::Denied {
            reason: DenialReason::Failed,
        }
    }

    #[must_use]
    pub const fn banned() -> Self {
        Self::Denied {
            reason: DenialReason::Banned,
        }
    }

    #[must_use]
    pub const fn reason(&self) -> Option<DenialReason> {
        match self {
            Self::Denied { reason } => Some(*reason),
            Self::Unavailable(_) => None,
        }
    }

    /// The ledger result recorded for this error.
    #[must_use]
    pub const fn attempt_result(&self) -> AttemptResult {
        match self {
            Self::Denied { reason: DenialReason::Banned } => AttemptResult::Banned,
            Self::Denied { reason: DenialReason::Failed } | Self::Unavailable(_) => {
                AttemptResult::Failed
            }
        }
    }
}

/// Non-fatal tracking failures. These are logged and never reach the caller.
#[derive(Debug, thiserror::Error)]
pub enum TrackingError {
    #[error("tracking unavailable: {0}")]
    Unavailable(&'static str),
    #[error("attempt id was already cleared from the call scope")]
    CleanupRace,
    #[error("attempt store failure: {0:#}")]
    Store(#[from] anyhow::Error),
}
