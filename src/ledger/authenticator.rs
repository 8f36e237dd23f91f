//! Tracked authentication entry points.
//!
//! `login` delegates to `authenticate`, which delegates to `check_credentials`.
//! All three are wrapped by the tracker, so whichever is called first opens the
//! attempt and the inner layers join it. Only `check_credentials` consults the
//! trust evaluator, right before the password is verified.

use anyhow::{anyhow, Result};
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::error::AuthError;
use super::scope::RequestContext;
use super::store::usable_remote;
use super::tracker::AttemptTracker;
use super::trust::TrustEvaluator;
use super::types::AttemptUpdate;

/// An authenticated user.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
    pub login: String,
}

/// Normalize a login for lookups.
#[must_use]
pub fn normalize_login(login: &str) -> String {
    login.trim().to_lowercase()
}

/// The real password check, provided by the user store.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Canonical form of the claimed login, written back to the attempt record.
    async fn canonical_login(&self, login: &str) -> String {
        normalize_login(login)
    }

    /// # Errors
    /// `AuthError::Denied` for bad credentials, `AuthError::Unavailable` if the
    /// user store cannot be queried.
    async fn verify(&self, login: &str, password: &SecretString) -> Result<Principal, AuthError>;

    /// Bookkeeping after a successful interactive login.
    async fn record_login(&self, _principal: &Principal) -> Result<()> {
        Ok(())
    }
}

/// Hash a password into an argon2 PHC string.
///
/// # Errors
/// Returns an error if hashing fails.
pub fn hash_password(password: &SecretString) -> Result<String> {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    let salt = SaltString::encode_b64(&salt).map_err(|err| anyhow!("invalid salt: {err}"))?;
    let hash = Argon2::default()
        .hash_password(password.expose_secret().as_bytes(), &salt)
        .map_err(|err| anyhow!("failed to hash password: {err}"))?;
    Ok(hash.to_string())
}

/// Check a password against a stored PHC string. Malformed hashes never verify.
#[must_use]
pub fn verify_password(phc: &str, password: &SecretString) -> bool {
    let Ok(parsed) = PasswordHash::new(phc) else {
        warn!("Stored password hash is malformed");
        return false;
    };
    Argon2::default()
        .verify_password(password.expose_secret().as_bytes(), &parsed)
        .is_ok()
}

#[derive(Clone)]
pub struct Authenticator {
    tracker: AttemptTracker,
    evaluator: Arc<TrustEvaluator>,
    verifier: Arc<dyn CredentialVerifier>,
}

impl Authenticator {
    #[must_use]
    pub fn new(
        tracker: AttemptTracker,
        evaluator: Arc<TrustEvaluator>,
        verifier: Arc<dyn CredentialVerifier>,
    ) -> Self {
        Self {
            tracker,
            evaluator,
            verifier,
        }
    }

    #[must_use]
    pub fn tracker(&self) -> &AttemptTracker {
        &self.tracker
    }

    #[must_use]
    pub fn evaluator(&self) -> &Arc<TrustEvaluator> {
        &self.evaluator
    }

    /// Interactive login.
    ///
    /// # Errors
    /// Returns the denial or backend error of the underlying check.
    #[instrument(skip(self, ctx, password))]
    pub async fn login(
        &self,
        ctx: Option<&RequestContext>,
        login: &str,
        password: &SecretString,
    ) -> Result<Principal, AuthError> {
        self.tracker
            .run_tracked(ctx, login, || async {
                let principal = self.authenticate(ctx, login, password).await?;
                if let Err(err) = self.verifier.record_login(&principal).await {
                    error!("Failed to record login: {err:#}");
                }
                info!("Login succeeded for {}", principal.login);
                Ok(principal)
            })
            .await
    }

    /// Generic authentication, used directly by non-interactive callers.
    ///
    /// # Errors
    /// Returns the denial or backend error of the underlying check.
    pub async fn authenticate(
        &self,
        ctx: Option<&RequestContext>,
        login: &str,
        password: &SecretString,
    ) -> Result<Principal, AuthError> {
        self.tracker
            .run_tracked(ctx, login, || self.check_credentials(ctx, login, password))
            .await
    }

    /// Trust gate followed by the real password check.
    ///
    /// # Errors
    /// `banned` when the remote/login pair is untrusted, otherwise whatever the
    /// verifier returns.
    pub async fn check_credentials(
        &self,
        ctx: Option<&RequestContext>,
        login: &str,
        password: &SecretString,
    ) -> Result<Principal, AuthError> {
        self.tracker
            .run_tracked(ctx, login, || async {
                let canonical = self.verifier.canonical_login(login).await;
                let snapshot = self
                    .tracker
                    .update_current(ctx, &AttemptUpdate::login(canonical.clone()))
                    .await;

                // An attempt that could not be written still has a known remote.
                let remote = match snapshot {
                    Some(attempt) => {
                        self.tracker.spawn_annotation(attempt.id, &attempt.remote);
                        Some(attempt.remote)
                    }
                    None => usable_remote(ctx.and_then(RequestContext::remote)).map(str::to_string),
                };

                if let Some(remote) = remote {
                    let trusted = self
                        .evaluator
                        .is_trusted(&remote, &canonical)
                        .await
                        .map_err(|err| {
                            error!("Trust evaluation failed: {err:#}");
                            AuthError::Unavailable("trust evaluation failed".to_string())
                        })?;
                    if !trusted {
                        warn!("Refusing untrusted remote {remote} for {canonical}");
                        return Err(AuthError::banned());
                    }
                }

                self.verifier.verify(&canonical, password).await
            })
            .await
    }
}
