//! Attempt lifecycle: open, run the wrapped check, record the outcome, release.

use std::{future::Future, sync::Arc};
use tracing::{debug, error, info, instrument, warn};

use super::error::{AuthError, TrackingError};
use super::geo::{is_resolvable, GeoResolver};
use super::scope::{AttemptGuard, RequestContext};
use super::store::AttemptStore;
use super::types::{AttemptId, AttemptRecord, AttemptResult, AttemptUpdate};

#[derive(Clone)]
pub struct AttemptTracker {
    store: Arc<dyn AttemptStore>,
    geo: Option<Arc<dyn GeoResolver>>,
}

impl AttemptTracker {
    #[must_use]
    pub fn new(store: Arc<dyn AttemptStore>) -> Self {
        Self { store, geo: None }
    }

    #[must_use]
    pub fn with_geo_resolver(mut self, resolver: Arc<dyn GeoResolver>) -> Self {
        self.geo = Some(resolver);
        self
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn AttemptStore> {
        &self.store
    }

    /// Open the call's attempt, or join the one already open in this call chain.
    ///
    /// # Errors
    /// Returns a `TrackingError` when there is no request context, no remote, or
    /// the store fails. Callers run untracked in that case.
    pub async fn enter<'a>(
        &self,
        ctx: Option<&'a RequestContext>,
        login: &str,
    ) -> Result<AttemptGuard<'a>, TrackingError> {
        let ctx = ctx.ok_or(TrackingError::Unavailable("request context unbound"))?;

        if let Some(attempt_id) = ctx.scope().current() {
            return Ok(AttemptGuard::nested(ctx.scope(), attempt_id));
        }

        match self.store.create(login, ctx.remote()).await? {
            Some(attempt_id) => {
                debug!("Opened attempt {attempt_id}");
                Ok(AttemptGuard::outermost(ctx.scope(), attempt_id))
            }
            None => Err(TrackingError::Unavailable("no remote address")),
        }
    }

    async fn enter_or_untracked<'a>(
        &self,
        ctx: Option<&'a RequestContext>,
        login: &str,
    ) -> AttemptGuard<'a> {
        match self.enter(ctx, login).await {
            Ok(guard) => guard,
            Err(err @ TrackingError::Store(_)) => {
                error!("Running untracked: {err}");
                AttemptGuard::untracked()
            }
            Err(err) => {
                info!("Running untracked: {err}");
                AttemptGuard::untracked()
            }
        }
    }

    /// Write `update` to the attempt open in `ctx`, if any, and return its snapshot.
    ///
    /// First write wins: once the result is terminal nothing changes. Store
    /// failures are logged and yield an empty snapshot.
    pub async fn update_current(
        &self,
        ctx: Option<&RequestContext>,
        update: &AttemptUpdate,
    ) -> Option<AttemptRecord> {
        let attempt_id = ctx.and_then(|ctx| ctx.scope().current())?;
        self.update(attempt_id, update).await
    }

    async fn update(&self, attempt_id: AttemptId, update: &AttemptUpdate) -> Option<AttemptRecord> {
        match self.store.update_result(attempt_id, update).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                error!("Failed to update attempt {attempt_id}: {err:#}");
                None
            }
        }
    }

    /// Run `operation` as one tracked attempt for `login`.
    ///
    /// The operation's outcome is returned unchanged; tracking failures never
    /// reach the caller.
    ///
    /// # Errors
    /// Returns whatever error `operation` returns.
    pub async fn run_tracked<T, F, Fut>(
        &self,
        ctx: Option<&RequestContext>,
        login: &str,
        operation: F,
    ) -> Result<T, AuthError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AuthError>>,
    {
        let mut guard = self.enter_or_untracked(ctx, login).await;

        let Some(attempt_id) = guard.attempt_id() else {
            return operation().await;
        };

        let outcome = operation().await;

        let result = match &outcome {
            Ok(_) => AttemptResult::Successful,
            Err(err) => err.attempt_result(),
        };
        self.update(attempt_id, &AttemptUpdate::result(result)).await;

        guard.exit();
        outcome
    }

    /// Attach geolocation metadata to the attempt in the background.
    pub fn spawn_annotation(&self, attempt_id: AttemptId, remote: &str) {
        if self.geo.is_none() {
            return;
        }
        let tracker = self.clone();
        let remote = remote.to_string();
        tokio::spawn(async move {
            tracker.annotate_remote(attempt_id, &remote).await;
        });
    }

    /// Resolve and store metadata for `remote`, reusing earlier lookups.
    /// Failures are logged and otherwise ignored.
    #[instrument(skip(self))]
    pub async fn annotate_remote(&self, attempt_id: AttemptId, remote: &str) {
        let Some(geo) = &self.geo else {
            return;
        };

        let known = match self.store.known_remote_metadata(remote).await {
            Ok(known) => known,
            Err(err) => {
                warn!("Failed to read cached remote metadata: {err:#}");
                None
            }
        };

        let metadata = if let Some(metadata) = known {
            metadata
        } else {
            if !is_resolvable(remote) {
                debug!("Skipping geolocation for non-global remote");
                return;
            }
            match geo.resolve(remote).await {
                Ok(metadata) => metadata,
                Err(err) => {
                    warn!("Geolocation failed: {err:#}");
                    return;
                }
            }
        };

        if let Err(err) = self.store.set_remote_metadata(attempt_id, &metadata).await {
            warn!("Failed to store remote metadata: {err:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::store::MemoryAttemptStore;
    use anyhow::{anyhow, Context, Result};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingResolver {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl GeoResolver for CountingResolver {
        async fn resolve(&self, _remote: &str) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow!("resolver offline"));
            }
            Ok(json!({"country": "United States"}))
        }
    }

    fn resolver(fail: bool) -> Arc<CountingResolver> {
        Arc::new(CountingResolver {
            calls: AtomicUsize::new(0),
            fail,
        })
    }

    #[tokio::test]
    async fn success_is_recorded_and_scope_released() -> Result<()> {
        let store = Arc::new(MemoryAttemptStore::new());
        let tracker = AttemptTracker::new(store.clone());
        let ctx = RequestContext::new(Some("203.0.113.5".to_string()));

        let value = tracker
            .run_tracked(Some(&ctx), "alice", || async { Ok::<_, AuthError>(42) })
            .await;
        assert_eq!(value, Ok(42));
        assert_eq!(ctx.scope().current(), None);

        let records = store.list(&Default::default()).await?;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].result, AttemptResult::Successful);
        Ok(())
    }

    #[tokio::test]
    async fn denial_reason_is_recorded_and_error_returned() -> Result<()> {
        let store = Arc::new(MemoryAttemptStore::new());
        let tracker = AttemptTracker::new(store.clone());
        let ctx = RequestContext::new(Some("203.0.113.5".to_string()));

        let outcome = tracker
            .run_tracked(Some(&ctx), "alice", || async {
                Err::<(), _>(AuthError::banned())
            })
            .await;
        assert_eq!(outcome, Err(AuthError::banned()));
        assert_eq!(ctx.scope().current(), None);

        let records = store.list(&Default::default()).await?;
        assert_eq!(records[0].result, AttemptResult::Banned);
        Ok(())
    }

    #[tokio::test]
    async fn missing_context_runs_untracked() -> Result<()> {
        let store = Arc::new(MemoryAttemptStore::new());
        let tracker = AttemptTracker::new(store.clone());

        let outcome = tracker
            .run_tracked(None, "alice", || async { Err::<(), _>(AuthError::denied()) })
            .await;
        assert_eq!(outcome, Err(AuthError::denied()));
        assert!(store.is_empty().await);
        assert!(tracker
            .update_current(None, &AttemptUpdate::login("alice"))
            .await
            .is_none());
        Ok(())
    }

    #[tokio::test]
    async fn missing_remote_runs_untracked() -> Result<()> {
        let store = Arc::new(MemoryAttemptStore::new());
        let tracker = AttemptTracker::new(store.clone());
        let ctx = RequestContext::new(None);

        let value = tracker
            .run_tracked(Some(&ctx), "alice", || async { Ok::<_, AuthError>("ok") })
            .await;
        assert_eq!(value, Ok("ok"));
        assert!(store.is_empty().await);
        assert!(tracker
            .update_current(Some(&ctx), &AttemptUpdate::login("alice"))
            .await
            .is_none());
        Ok(())
    }

    #[tokio::test]
    async fn nested_runs_share_one_attempt() -> Result<()> {
        let store = Arc::new(MemoryAttemptStore::new());
        let tracker = AttemptTracker::new(store.clone());
        let ctx = RequestContext::new(Some("203.0.113.5".to_string()));

        let outcome = tracker
            .run_tracked(Some(&ctx), "alice", || async {
                let outer_id = ctx.scope().current();
                tracker
                    .run_tracked(Some(&ctx), "alice", || async {
                        assert_eq!(ctx.scope().current(), outer_id);
                        Err::<(), _>(AuthError::denied())
                    })
                    .await?;
                // inner failure already recorded, this would be a later write
                Ok(())
            })
            .await;
        assert_eq!(outcome, Err(AuthError::denied()));

        let records = store.list(&Default::default()).await?;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].result, AttemptResult::Failed);
        assert_eq!(ctx.scope().current(), None);
        Ok(())
    }

    #[tokio::test]
    async fn scope_is_released_when_the_operation_is_cancelled() -> Result<()> {
        let store = Arc::new(MemoryAttemptStore::new());
        let tracker = AttemptTracker::new(store.clone());
        let ctx = RequestContext::new(Some("203.0.113.5".to_string()));

        let run = tracker.run_tracked(Some(&ctx), "alice", || async {
            std::future::pending::<Result<(), AuthError>>().await
        });
        let timed_out = tokio::time::timeout(std::time::Duration::from_millis(20), run).await;
        assert!(timed_out.is_err());
        assert_eq!(ctx.scope().current(), None);

        let records = store.list(&Default::default()).await?;
        assert_eq!(records[0].result, AttemptResult::Pending);
        Ok(())
    }

    #[tokio::test]
    async fn annotation_stores_metadata_once_per_remote() -> Result<()> {
        let store = Arc::new(MemoryAttemptStore::new());
        let geo = resolver(false);
        let tracker = AttemptTracker::new(store.clone()).with_geo_resolver(geo.clone());

        let first = store
            .create("alice", Some("8.8.8.8"))
            .await?
            .context("attempt not created")?;
        let second = store
            .create("bob", Some("8.8.8.8"))
            .await?
            .context("attempt not created")?;
        tracker.annotate_remote(first, "8.8.8.8").await;
        tracker.annotate_remote(second, "8.8.8.8").await;

        assert_eq!(geo.calls.load(Ordering::SeqCst), 1);
        let record = store.get(second).await?.context("attempt missing")?;
        assert_eq!(
            record.remote_metadata,
            Some(json!({"country": "United States"}))
        );
        Ok(())
    }

    #[tokio::test]
    async fn annotation_failures_are_swallowed() -> Result<()> {
        let store = Arc::new(MemoryAttemptStore::new());
        let geo = resolver(true);
        let tracker = AttemptTracker::new(store.clone()).with_geo_resolver(geo.clone());

        let id = store
            .create("alice", Some("8.8.4.4"))
            .await?
            .context("attempt not created")?;
        tracker.annotate_remote(id, "8.8.4.4").await;
        tracker.annotate_remote(id, "10.0.0.1").await;

        assert_eq!(geo.calls.load(Ordering::SeqCst), 1);
        let record = store.get(id).await?.context("attempt missing")?;
        assert_eq!(record.remote_metadata, None);
        Ok(())
    }
}
