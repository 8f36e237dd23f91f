//! Attempt store contract and the in-memory implementation.
//!
//! Every store operation is its own unit of work: once a call returns, its
//! effect is committed no matter what happens to the caller's transaction.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::types::{
    AttemptFilter, AttemptId, AttemptRecord, AttemptResult, AttemptUpdate, FailureQuery,
};

/// Trimmed remote, or `None` when there is nothing worth tracking.
#[must_use]
pub fn usable_remote(remote: Option<&str>) -> Option<&str> {
    remote.map(str::trim).filter(|remote| !remote.is_empty())
}

#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Insert a pending attempt. Returns `None` without writing when `remote`
    /// is absent or blank.
    async fn create(&self, login: &str, remote: Option<&str>) -> Result<Option<AttemptId>>;

    /// Apply `update` if the record is still pending and return its snapshot.
    /// Terminal records are left untouched. Unknown ids yield `None`.
    async fn update_result(
        &self,
        id: AttemptId,
        update: &AttemptUpdate,
    ) -> Result<Option<AttemptRecord>>;

    async fn get(&self, id: AttemptId) -> Result<Option<AttemptRecord>>;

    /// Count `failed`/`banned` records matching the query.
    async fn count_failures(&self, query: &FailureQuery) -> Result<i64>;

    /// Most recent `successful` attempt for the given remote and/or login, at or
    /// before `until`.
    async fn last_success(
        &self,
        remote: Option<&str>,
        login: Option<&str>,
        until: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>>;

    /// Attach geolocation metadata if the record has none yet.
    async fn set_remote_metadata(&self, id: AttemptId, metadata: &serde_json::Value)
        -> Result<()>;

    /// Metadata already resolved for this remote on any record.
    async fn known_remote_metadata(&self, remote: &str) -> Result<Option<serde_json::Value>>;

    async fn list(&self, filter: &AttemptFilter) -> Result<Vec<AttemptRecord>>;
}

/// Process-local attempt store.
///
/// Writes are visible as soon as the call returns, which gives the same
/// commit-independence as the database store for tests and embedded use.
#[derive(Debug, Default)]
pub struct MemoryAttemptStore {
    records: Mutex<Vec<AttemptRecord>>,
}

impl MemoryAttemptStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record as-is, e.g. history imported from elsewhere.
    pub async fn insert(&self, record: AttemptRecord) {
        self.records.lock().await.push(record);
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

fn in_scope(record: &AttemptRecord, remote: Option<&str>, login: Option<&str>) -> bool {
    remote.map_or(true, |remote| record.remote == remote)
        && login.map_or(true, |login| record.login == login)
}

#[async_trait]
impl AttemptStore for MemoryAttemptStore {
    async fn create(&self, login: &str, remote: Option<&str>) -> Result<Option<AttemptId>> {
        let Some(remote) = usable_remote(remote) else {
            return Ok(None);
        };
        let id = Uuid::now_v7();
        self.records.lock().await.push(AttemptRecord {
            id,
            login: login.to_string(),
            remote: remote.to_string(),
            created_at: Utc::now(),
            result: AttemptResult::Pending,
            remote_metadata: None,
        });
        Ok(Some(id))
    }

    async fn update_result(
        &self,
        id: AttemptId,
        update: &AttemptUpdate,
    ) -> Result<Option<AttemptRecord>> {
        let mut records = self.records.lock().await;
        let Some(record) = records.iter_mut().find(|record| record.id == id) else {
            return Ok(None);
        };
        if record.result == AttemptResult::Pending {
            if let Some(login) = &update.login {
                record.login.clone_from(login);
            }
            if let Some(result) = update.result {
                record.result = result;
            }
        }
        Ok(Some(record.clone()))
    }

    async fn get(&self, id: AttemptId) -> Result<Option<AttemptRecord>> {
        let records = self.records.lock().await;
        Ok(records.iter().find(|record| record.id == id).cloned())
    }

    async fn count_failures(&self, query: &FailureQuery) -> Result<i64> {
        let records = self.records.lock().await;
        let count = records
            .iter()
            .filter(|record| record.result.is_failure())
            .filter(|record| record.created_at > query.after && record.created_at <= query.until)
            .filter(|record| in_scope(record, query.remote.as_deref(), query.login.as_deref()))
            .count();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }

    async fn last_success(
        &self,
        remote: Option<&str>,
        login: Option<&str>,
        until: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        let records = self.records.lock().await;
        Ok(records
            .iter()
            .filter(|record| record.result == AttemptResult::Successful)
            .filter(|record| record.created_at <= until)
            .filter(|record| in_scope(record, remote, login))
            .map(|record| record.created_at)
            .max())
    }

    async fn set_remote_metadata(
        &self,
        id: AttemptId,
        metadata: &serde_json::Value,
    ) -> Result<()> {
        let mut records = self.records.lock().await;
        if let Some(record) = records.iter_mut().find(|record| record.id == id) {
            if record.remote_metadata.is_none() {
                record.remote_metadata = Some(metadata.clone());
            }
        }
        Ok(())
    }

    async fn known_remote_metadata(&self, remote: &str) -> Result<Option<serde_json::Value>> {
        let records = self.records.lock().await;
        Ok(records
            .iter()
            .rev()
            .filter(|record| record.remote == remote)
            .find_map(|record| record.remote_metadata.clone()))
    }

    async fn list(&self, filter: &AttemptFilter) -> Result<Vec<AttemptRecord>> {
        let records = self.records.lock().await;
        let mut matching: Vec<AttemptRecord> = records
            .iter()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        matching.truncate(usize::try_from(filter.effective_limit()).unwrap_or(usize::MAX));
        Ok(matching)
    }
}
