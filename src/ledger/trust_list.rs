//! Operator-managed whitelist/blacklist entries.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::types::{NewTrustListEntry, TrustListEntry};

#[async_trait]
pub trait TrustListStore: Send + Sync {
    async fn add(&self, entry: NewTrustListEntry) -> Result<TrustListEntry>;

    /// Returns `false` when no entry had this id.
    async fn remove(&self, id: Uuid) -> Result<bool>;

    async fn list(&self) -> Result<Vec<TrustListEntry>>;

    /// Unexpired entries keyed by `remote` or by `login`.
    async fn active_matches(
        &self,
        remote: Option<&str>,
        login: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<TrustListEntry>>;
}

#[derive(Debug, Default)]
pub struct MemoryTrustList {
    entries: RwLock<Vec<TrustListEntry>>,
}

impl MemoryTrustList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TrustListStore for MemoryTrustList {
    async fn add(&self, entry: NewTrustListEntry) -> Result<TrustListEntry> {
        let entry = TrustListEntry {
            id: Uuid::now_v7(),
            subject: entry.subject.normalized(),
            kind: entry.kind,
            expires_at: entry.expires_at,
            note: entry.note,
            created_at: Utc::now(),
        };
        self.entries.write().await.push(entry.clone());
        Ok(entry)
    }

    async fn remove(&self, id: Uuid) -> Result<bool> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        Ok(entries.len() != before)
    }

    async fn list(&self) -> Result<Vec<TrustListEntry>> {
        Ok(self.entries.read().await.clone())
    }

    async fn active_matches(
        &self,
        remote: Option<&str>,
        login: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<TrustListEntry>> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .filter(|entry| entry.is_active(now) && entry.subject.matches(remote, login))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::types::{TrustListKind, TrustSubject};
    use chrono::Duration;

    fn entry(subject: TrustSubject, expires_at: Option<DateTime<Utc>>) -> NewTrustListEntry {
        NewTrustListEntry {
            subject,
            kind: TrustListKind::Blacklist,
            expires_at,
            note: None,
        }
    }

    #[tokio::test]
    async fn active_matches_skips_expired_and_unrelated() -> Result<()> {
        let list = MemoryTrustList::new();
        let now = Utc::now();
        list.add(entry(TrustSubject::Remote("r1".to_string()), None))
            .await?;
        list.add(entry(
            TrustSubject::Login("alice".to_string()),
            Some(now - Duration::minutes(1)),
        ))
        .await?;
        list.add(entry(TrustSubject::Remote("r2".to_string()), None))
            .await?;

        let matches = list.active_matches(Some("r1"), "alice", now).await?;
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].subject, TrustSubject::Remote("r1".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn remove_reports_whether_entry_existed() -> Result<()> {
        let list = MemoryTrustList::new();
        let added = list
            .add(entry(TrustSubject::Login("alice".to_string()), None))
            .await?;
        assert!(list.remove(added.id).await?);
        assert!(!list.remove(added.id).await?);
        assert!(list.list().await?.is_empty());
        Ok(())
    }
}
