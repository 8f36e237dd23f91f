//! # Tutela (Authentication Attempt Ledger)
//!
//! `tutela` records every password-based authentication attempt and decides,
//! right before the real credential check, whether the caller is trusted.
//!
//! ## Attempt Ledger
//!
//! - **One record per call:** login, authenticate and the credential check are
//!   layered; only the outermost layer opens an attempt, the inner ones join it.
//! - **First write wins:** an attempt is created `pending` and its result is set
//!   once to `successful`, `failed` or `banned`.
//! - **Independent commits:** attempts are written outside the caller's unit of
//!   work, so failures persist even when the caller rolls back.
//!
//! ## Trust Gate
//!
//! Too many recent failures for a remote/login pair turn the next attempt into a
//! `banned` denial without consulting the password. Manual whitelist and
//! blacklist entries override the counters.

pub mod api;
pub mod cli;
pub mod ledger;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
