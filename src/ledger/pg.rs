//! `PostgreSQL` implementations of the ledger stores.
//!
//! Flow Overview:
//! 1) Each attempt store call checks out its own pooled connection and commits
//!    before returning, so attempts survive a rollback of the caller's transaction.
//! 2) Result updates are a conditional `UPDATE ... WHERE result = 'pending'`,
//!    followed by a read of the current row, which makes the first write final.
//! 3) Trust list, settings and users are plain table reads.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::authenticator::{normalize_login, verify_password, CredentialVerifier, Principal};
use super::error::AuthError;
use super::settings::{SettingsProvider, StaticSettings};
use super::store::{usable_remote, AttemptStore};
use super::trust_list::TrustListStore;
use super::types::{
    AttemptFilter, AttemptId, AttemptRecord, AttemptResult, AttemptUpdate, FailureQuery,
    NewTrustListEntry, TrustListEntry, TrustSubject,
};

fn db_span(operation: &'static str, statement: &'static str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn attempt_from_row(row: &PgRow) -> Result<AttemptRecord> {
    let result: String = row.try_get("result")?;
    Ok(AttemptRecord {
        id: row.try_get("id")?,
        login: row.try_get("login")?,
        remote: row.try_get("remote")?,
        created_at: row.try_get("created_at")?,
        result: result.parse()?,
        remote_metadata: row.try_get("remote_metadata")?,
    })
}

#[derive(Debug, Clone)]
pub struct PgAttemptStore {
    pool: PgPool,
}

impl PgAttemptStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AttemptStore for PgAttemptStore {
    async fn create(&self, login: &str, remote: Option<&str>) -> Result<Option<AttemptId>> {
        let Some(remote) = usable_remote(remote) else {
            return Ok(None);
        };

        let query = r"
            INSERT INTO auth_attempts (id, login, remote, created_at, result)
            VALUES ($1, $2, $3, $4, 'pending')
        ";
        let id = Uuid::now_v7();
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin attempt transaction")?;
        sqlx::query(query)
            .bind(id)
            .bind(login)
            .bind(remote)
            .bind(Utc::now())
            .execute(&mut *tx)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to insert auth attempt")?;
        tx.commit().await.context("commit attempt transaction")?;

        Ok(Some(id))
    }

    async fn update_result(
        &self,
        id: AttemptId,
        update: &AttemptUpdate,
    ) -> Result<Option<AttemptRecord>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin attempt update transaction")?;

        if !update.is_empty() {
            let query = r"
                UPDATE auth_attempts
                SET result = COALESCE($2, result),
                    login = COALESCE($3, login)
                WHERE id = $1 AND result = 'pending'
            ";
            sqlx::query(query)
                .bind(id)
                .bind(update.result.map(AttemptResult::as_str))
                .bind(update.login.as_deref())
                .execute(&mut *tx)
                .instrument(db_span("UPDATE", query))
                .await
                .context("failed to update auth attempt")?;
        }

        let query = r"
            SELECT id, login, remote, created_at, result, remote_metadata
            FROM auth_attempts
            WHERE id = $1
        ";
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&mut *tx)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to read auth attempt")?;

        tx.commit()
            .await
            .context("commit attempt update transaction")?;

        row.as_ref().map(attempt_from_row).transpose()
    }

    async fn get(&self, id: AttemptId) -> Result<Option<AttemptRecord>> {
        let query = r"
            SELECT id, login, remote, created_at, result, remote_metadata
            FROM auth_attempts
            WHERE id = $1
        ";
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to read auth attempt")?;
        row.as_ref().map(attempt_from_row).transpose()
    }

    async fn count_failures(&self, query: &FailureQuery) -> Result<i64> {
        let statement = r"
            SELECT COUNT(*) AS count
            FROM auth_attempts
            WHERE result IN ('failed', 'banned')
              AND created_at > $1
              AND created_at <= $2
              AND ($3::text IS NULL OR remote = $3)
              AND ($4::text IS NULL OR login = $4)
        ";
        let row = sqlx::query(statement)
            .bind(query.after)
            .bind(query.until)
            .bind(query.remote.as_deref())
            .bind(query.login.as_deref())
            .fetch_one(&self.pool)
            .instrument(db_span("SELECT", statement))
            .await
            .context("failed to count failed attempts")?;
        Ok(row.get("count"))
    }

    async fn last_success(
        &self,
        remote: Option<&str>,
        login: Option<&str>,
        until: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        let query = r"
            SELECT MAX(created_at) AS last_success
            FROM auth_attempts
            WHERE result = 'successful'
              AND created_at <= $1
              AND ($2::text IS NULL OR remote = $2)
              AND ($3::text IS NULL OR login = $3)
        ";
        let row = sqlx::query(query)
            .bind(until)
            .bind(remote)
            .bind(login)
            .fetch_one(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to read last successful attempt")?;
        Ok(row.get("last_success"))
    }

    async fn set_remote_metadata(
        &self,
        id: AttemptId,
        metadata: &serde_json::Value,
    ) -> Result<()> {
        let query = r"
            UPDATE auth_attempts
            SET remote_metadata = $2
            WHERE id = $1 AND remote_metadata IS NULL
        ";
        sqlx::query(query)
            .bind(id)
            .bind(metadata)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to store remote metadata")?;
        Ok(())
    }

    async fn known_remote_metadata(&self, remote: &str) -> Result<Option<serde_json::Value>> {
        let query = r"
            SELECT remote_metadata
            FROM auth_attempts
            WHERE remote = $1 AND remote_metadata IS NOT NULL
            ORDER BY created_at DESC
            LIMIT 1
        ";
        let row = sqlx::query(query)
            .bind(remote)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to read remote metadata")?;
        Ok(row.map(|row| row.get("remote_metadata")))
    }

    async fn list(&self, filter: &AttemptFilter) -> Result<Vec<AttemptRecord>> {
        let query = r"
            SELECT id, login, remote, created_at, result, remote_metadata
            FROM auth_attempts
            WHERE ($1::text IS NULL OR remote = $1)
              AND ($2::text IS NULL OR login = $2)
              AND ($3::text IS NULL OR result = $3)
            ORDER BY created_at DESC, id DESC
            LIMIT $4
        ";
        let rows = sqlx::query(query)
            .bind(filter.remote.as_deref())
            .bind(filter.login.as_deref())
            .bind(filter.result.map(AttemptResult::as_str))
            .bind(i64::from(filter.effective_limit()))
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to list auth attempts")?;
        rows.iter().map(attempt_from_row).collect()
    }
}

fn trust_entry_from_row(row: &PgRow) -> Result<TrustListEntry> {
    let subject_kind: String = row.try_get("subject_kind")?;
    let kind: String = row.try_get("kind")?;
    Ok(TrustListEntry {
        id: row.try_get("id")?,
        subject: TrustSubject::from_parts(&subject_kind, row.try_get("subject")?)?,
        kind: kind.parse()?,
        expires_at: row.try_get("expires_at")?,
        note: row.try_get("note")?,
        created_at: row.try_get("created_at")?,
    })
}

#[derive(Debug, Clone)]
pub struct PgTrustList {
    pool: PgPool,
}

impl PgTrustList {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TrustListStore for PgTrustList {
    async fn add(&self, entry: NewTrustListEntry) -> Result<TrustListEntry> {
        let query = r"
            INSERT INTO trust_list (id, subject_kind, subject, kind, expires_at, note)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, subject_kind, subject, kind, expires_at, note, created_at
        ";
        let subject = entry.subject.normalized();
        let row = sqlx::query(query)
            .bind(Uuid::now_v7())
            .bind(subject.kind_str())
            .bind(subject.value())
            .bind(entry.kind.as_str())
            .bind(entry.expires_at)
            .bind(entry.note.as_deref())
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to insert trust list entry")?;
        trust_entry_from_row(&row)
    }

    async fn remove(&self, id: Uuid) -> Result<bool> {
        let query = "DELETE FROM trust_list WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to delete trust list entry")?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> Result<Vec<TrustListEntry>> {
        let query = r"
            SELECT id, subject_kind, subject, kind, expires_at, note, created_at
            FROM trust_list
            ORDER BY created_at DESC
        ";
        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to list trust list entries")?;
        rows.iter().map(trust_entry_from_row).collect()
    }

    async fn active_matches(
        &self,
        remote: Option<&str>,
        login: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<TrustListEntry>> {
        let query = r"
            SELECT id, subject_kind, subject, kind, expires_at, note, created_at
            FROM trust_list
            WHERE (expires_at IS NULL OR expires_at > $3)
              AND ((subject_kind = 'remote' AND subject = $1)
                OR (subject_kind = 'login' AND lower(btrim(subject)) = $2))
        ";
        let rows = sqlx::query(query)
            .bind(remote)
            .bind(login)
            .bind(now)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to read trust list")?;
        rows.iter().map(trust_entry_from_row).collect()
    }
}

/// Settings stored in `ledger_settings`, falling back to `defaults`.
#[derive(Debug)]
pub struct PgSettings {
    pool: PgPool,
    defaults: StaticSettings,
}

impl PgSettings {
    #[must_use]
    pub fn new(pool: PgPool, defaults: StaticSettings) -> Self {
        Self { pool, defaults }
    }
}

#[async_trait]
impl SettingsProvider for PgSettings {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let query = "SELECT value FROM ledger_settings WHERE key = $1";
        let row = sqlx::query(query)
            .bind(key)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to read ledger setting")?;
        Ok(row
            .map(|row| row.get::<String, _>("value"))
            .or_else(|| self.defaults.value(key)))
    }
}

/// Users with argon2 password hashes in the `users` table.
#[derive(Debug, Clone)]
pub struct PgCredentialVerifier {
    pool: PgPool,
}

impl PgCredentialVerifier {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialVerifier for PgCredentialVerifier {
    async fn canonical_login(&self, login: &str) -> String {
        normalize_login(login)
    }

    async fn verify(&self, login: &str, password: &SecretString) -> Result<Principal, AuthError> {
        let query = r"
            SELECT id, login, password_hash
            FROM users
            WHERE login = $1 AND active
        ";
        let row = sqlx::query(query)
            .bind(login)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .map_err(|err| {
                tracing::error!("User lookup failed: {err}");
                AuthError::Unavailable("user lookup failed".to_string())
            })?;

        let Some(row) = row else {
            return Err(AuthError::denied());
        };

        let password_hash: String = row.get("password_hash");
        if !verify_password(&password_hash, password) {
            return Err(AuthError::denied());
        }

        Ok(Principal {
            user_id: row.get("id"),
            login: row.get("login"),
        })
    }

    async fn record_login(&self, principal: &Principal) -> Result<()> {
        let query = "UPDATE users SET last_login_at = NOW() WHERE id = $1";
        sqlx::query(query)
            .bind(principal.user_id)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to record last login")?;
        Ok(())
    }
}
