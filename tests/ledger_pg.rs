//! Postgres-backed ledger tests. Set `TUTELA_TEST_DSN` to a scratch database
//! to run them; they are skipped otherwise.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use sqlx::{postgres::PgPoolOptions, Connection, PgConnection, PgPool, Row};
use std::sync::Arc;
use tutela::ledger::{
    authenticator::{hash_password, Authenticator, CredentialVerifier, Principal},
    error::AuthError,
    pg::{PgAttemptStore, PgCredentialVerifier, PgSettings, PgTrustList},
    scope::RequestContext,
    settings::{SettingsProvider, StaticSettings, KEY_MAX_FAILURES, KEY_WINDOW_SECONDS},
    store::AttemptStore,
    tracker::AttemptTracker,
    trust::TrustEvaluator,
    trust_list::TrustListStore,
    types::{AttemptResult, AttemptUpdate, FailureQuery, NewTrustListEntry, TrustListKind, TrustSubject},
};
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));

async fn test_pool() -> Option<PgPool> {
    let Ok(dsn) = std::env::var("TUTELA_TEST_DSN") else {
        eprintln!("Skipping integration test: TUTELA_TEST_DSN not set");
        return None;
    };
    let pool = match PgPoolOptions::new().max_connections(5).connect(&dsn).await {
        Ok(pool) => pool,
        Err(err) => {
            eprintln!("Skipping integration test: {err}");
            return None;
        }
    };
    if let Err(err) = apply_schema(&pool).await {
        eprintln!("Skipping integration test: {err:#}");
        return None;
    }
    Some(pool)
}

async fn apply_schema(pool: &PgPool) -> Result<()> {
    for (index, statement) in split_sql_statements(SCHEMA_SQL).iter().enumerate() {
        sqlx::query(statement)
            .execute(pool)
            .await
            .with_context(|| format!("failed to execute schema statement {}", index + 1))?;
    }
    Ok(())
}

fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    for line in sql.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("--") {
            continue;
        }
        current.push_str(line);
        current.push('\n');
        if trimmed.ends_with(';') {
            statements.push(std::mem::take(&mut current));
        }
    }
    if !current.trim().is_empty() {
        statements.push(current);
    }
    statements
}

// Each test works on its own remote so runs against a shared database do not interfere.
fn unique_remote() -> String {
    format!("test-{}", Uuid::new_v4())
}

struct FixedVerifier;

#[async_trait]
impl CredentialVerifier for FixedVerifier {
    async fn verify(&self, login: &str, password: &SecretString) -> Result<Principal, AuthError> {
        if password.expose_secret() == "secret" {
            Ok(Principal {
                user_id: Uuid::nil(),
                login: login.to_string(),
            })
        } else {
            Err(AuthError::denied())
        }
    }
}

fn authenticator(pool: &PgPool, settings: StaticSettings) -> Authenticator {
    let attempts: Arc<dyn AttemptStore> = Arc::new(PgAttemptStore::new(pool.clone()));
    let trust_list: Arc<dyn TrustListStore> = Arc::new(PgTrustList::new(pool.clone()));
    let evaluator = Arc::new(TrustEvaluator::new(
        attempts.clone(),
        trust_list,
        Arc::new(settings),
    ));
    Authenticator::new(AttemptTracker::new(attempts), evaluator, Arc::new(FixedVerifier))
}

#[tokio::test]
async fn first_write_wins_in_postgres() -> Result<()> {
    let Some(pool) = test_pool().await else {
        return Ok(());
    };
    let store = PgAttemptStore::new(pool);
    let remote = unique_remote();

    assert!(store.create("alice", None).await?.is_none());
    assert!(store.create("alice", Some("")).await?.is_none());

    let id = store
        .create("alice", Some(&remote))
        .await?
        .context("attempt not created")?;
    let snapshot = store
        .update_result(id, &AttemptUpdate::login("alice2"))
        .await?
        .context("missing snapshot")?;
    assert_eq!(snapshot.result, AttemptResult::Pending);
    assert_eq!(snapshot.login, "alice2");

    store
        .update_result(id, &AttemptUpdate::result(AttemptResult::Failed))
        .await?;
    let snapshot = store
        .update_result(id, &AttemptUpdate::result(AttemptResult::Successful))
        .await?
        .context("missing snapshot")?;
    assert_eq!(snapshot.result, AttemptResult::Failed);

    assert!(store
        .update_result(Uuid::now_v7(), &AttemptUpdate::result(AttemptResult::Failed))
        .await?
        .is_none());

    let now = Utc::now();
    let count = store
        .count_failures(&FailureQuery {
            remote: Some(remote.clone()),
            login: Some("alice2".to_string()),
            after: now - Duration::minutes(5),
            until: now,
        })
        .await?;
    assert_eq!(count, 1);
    Ok(())
}

#[tokio::test]
async fn failures_ban_the_pair_in_postgres() -> Result<()> {
    let Some(pool) = test_pool().await else {
        return Ok(());
    };
    let remote = unique_remote();
    let auth = authenticator(
        &pool,
        StaticSettings::new()
            .with(KEY_MAX_FAILURES, "3")
            .with(KEY_WINDOW_SECONDS, "600"),
    );
    let wrong = SecretString::from("wrong".to_string());
    let right = SecretString::from("secret".to_string());

    for _ in 0..3 {
        let ctx = RequestContext::new(Some(remote.clone()));
        assert_eq!(
            auth.login(Some(&ctx), "alice", &wrong).await,
            Err(AuthError::denied())
        );
    }
    let ctx = RequestContext::new(Some(remote.clone()));
    assert_eq!(
        auth.login(Some(&ctx), "alice", &right).await,
        Err(AuthError::banned())
    );

    let ctx = RequestContext::new(Some(unique_remote()));
    assert!(auth.login(Some(&ctx), "alice", &right).await.is_ok());
    Ok(())
}

#[tokio::test]
async fn attempts_survive_a_rolled_back_caller_transaction() -> Result<()> {
    let Some(pool) = test_pool().await else {
        return Ok(());
    };
    let remote = unique_remote();
    let auth = authenticator(&pool, StaticSettings::new());
    let dsn = std::env::var("TUTELA_TEST_DSN")?;

    let mut caller = PgConnection::connect(&dsn).await?;
    let mut tx = caller.begin().await?;
    sqlx::query("CREATE TEMP TABLE caller_work (note TEXT) ON COMMIT DROP")
        .execute(&mut *tx)
        .await?;
    sqlx::query("INSERT INTO caller_work (note) VALUES ('session')")
        .execute(&mut *tx)
        .await?;

    let ctx = RequestContext::new(Some(remote.clone()));
    let result = auth
        .login(Some(&ctx), "alice", &SecretString::from("wrong".to_string()))
        .await;
    assert!(result.is_err());
    tx.rollback().await?;

    let row = sqlx::query("SELECT result FROM auth_attempts WHERE remote = $1")
        .bind(&remote)
        .fetch_one(&pool)
        .await?;
    assert_eq!(row.get::<String, _>("result"), "failed");
    Ok(())
}

#[tokio::test]
async fn trust_list_and_settings_in_postgres() -> Result<()> {
    let Some(pool) = test_pool().await else {
        return Ok(());
    };
    let remote = unique_remote();
    let trust_list = PgTrustList::new(pool.clone());

    let entry = trust_list
        .add(NewTrustListEntry {
            subject: TrustSubject::Remote(remote.clone()),
            kind: TrustListKind::Blacklist,
            expires_at: Some(Utc::now() + Duration::hours(1)),
            note: Some("integration".to_string()),
        })
        .await?;
    let matches = trust_list
        .active_matches(Some(&remote), "nobody", Utc::now())
        .await?;
    assert_eq!(matches, vec![entry.clone()]);
    assert!(trust_list
        .active_matches(Some(&remote), "nobody", Utc::now() + Duration::hours(2))
        .await?
        .is_empty());
    assert!(trust_list.remove(entry.id).await?);
    assert!(!trust_list.remove(entry.id).await?);

    let login = format!("user-{}", Uuid::new_v4().simple());
    let login_entry = trust_list
        .add(NewTrustListEntry {
            subject: TrustSubject::Login(format!(" {} ", login.to_uppercase())),
            kind: TrustListKind::Blacklist,
            expires_at: None,
            note: None,
        })
        .await?;
    assert_eq!(login_entry.subject, TrustSubject::Login(login.clone()));
    let matches = trust_list.active_matches(None, &login, Utc::now()).await?;
    assert_eq!(matches, vec![login_entry.clone()]);
    assert!(trust_list.remove(login_entry.id).await?);

    let key = format!("tutela.test_{}", Uuid::new_v4().simple());
    let settings = PgSettings::new(pool.clone(), StaticSettings::new().with(&key, "fallback"));
    assert_eq!(settings.get(&key).await?.as_deref(), Some("fallback"));
    sqlx::query("INSERT INTO ledger_settings (key, value) VALUES ($1, 'stored')")
        .bind(&key)
        .execute(&pool)
        .await?;
    assert_eq!(settings.get(&key).await?.as_deref(), Some("stored"));
    sqlx::query("DELETE FROM ledger_settings WHERE key = $1")
        .bind(&key)
        .execute(&pool)
        .await?;
    Ok(())
}

#[tokio::test]
async fn users_are_verified_with_argon2() -> Result<()> {
    let Some(pool) = test_pool().await else {
        return Ok(());
    };
    let login = format!("user-{}", Uuid::new_v4().simple());
    let password = SecretString::from("correct horse".to_string());
    sqlx::query("INSERT INTO users (id, login, password_hash) VALUES ($1, $2, $3)")
        .bind(Uuid::now_v7())
        .bind(&login)
        .bind(hash_password(&password)?)
        .execute(&pool)
        .await?;

    let verifier = PgCredentialVerifier::new(pool.clone());
    let principal = verifier.verify(&login, &password).await?;
    assert_eq!(principal.login, login);
    assert_eq!(
        verifier
            .verify(&login, &SecretString::from("nope".to_string()))
            .await,
        Err(AuthError::denied())
    );
    assert_eq!(
        verifier.verify("missing-user", &password).await,
        Err(AuthError::denied())
    );

    verifier.record_login(&principal).await?;
    let row = sqlx::query("SELECT last_login_at IS NOT NULL AS seen FROM users WHERE login = $1")
        .bind(&login)
        .fetch_one(&pool)
        .await?;
    assert!(row.get::<bool, _>("seen"));
    Ok(())
}
