//! Request-scoped state for the reentrancy guard.
//!
//! A `RequestContext` is built once per inbound call and passed explicitly down
//! every authentication layer. Its `CallScope` remembers the attempt opened by
//! the outermost layer so nested layers reuse it instead of opening another.

use std::sync::{Mutex, PoisonError};
use tracing::info;

use super::error::TrackingError;
use super::types::AttemptId;

#[derive(Debug, Default)]
pub struct CallScope {
    current: Mutex<Option<AttemptId>>,
}

impl CallScope {
    #[must_use]
    pub fn current(&self) -> Option<AttemptId> {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set(&self, attempt_id: AttemptId) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(attempt_id);
    }

    pub(crate) fn take(&self) -> Option<AttemptId> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Everything the ledger needs to know about the in-flight call.
#[derive(Debug, Default)]
pub struct RequestContext {
    remote: Option<String>,
    request_id: Option<String>,
    scope: CallScope,
}

impl RequestContext {
    /// Blank or whitespace-only remotes are treated as unknown.
    #[must_use]
    pub fn new(remote: Option<String>) -> Self {
        Self {
            remote: remote
                .map(|remote| remote.trim().to_string())
                .filter(|remote| !remote.is_empty()),
            request_id: None,
            scope: CallScope::default(),
        }
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    #[must_use]
    pub fn remote(&self) -> Option<&str> {
        self.remote.as_deref()
    }

    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    #[must_use]
    pub fn scope(&self) -> &CallScope {
        &self.scope
    }
}

/// Scoped handle on the call's attempt.
///
/// The outermost guard owns the scope entry and clears it when dropped, on
/// every exit path. Nested guards only borrow the id.
#[derive(Debug)]
pub struct AttemptGuard<'a> {
    scope: Option<&'a CallScope>,
    attempt_id: Option<AttemptId>,
    outermost: bool,
}

impl<'a> AttemptGuard<'a> {
    pub(crate) fn untracked() -> Self {
        Self {
            scope: None,
            attempt_id: None,
            outermost: false,
        }
    }

    pub(crate) fn nested(scope: &'a CallScope, attempt_id: AttemptId) -> Self {
        Self {
            scope: Some(scope),
            attempt_id: Some(attempt_id),
            outermost: false,
        }
    }

    pub(crate) fn outermost(scope: &'a CallScope, attempt_id: AttemptId) -> Self {
        scope.set(attempt_id);
        Self {
            scope: Some(scope),
            attempt_id: Some(attempt_id),
            outermost: true,
        }
    }

    #[must_use]
    pub fn attempt_id(&self) -> Option<AttemptId> {
        self.attempt_id
    }

    #[must_use]
    pub fn is_outermost(&self) -> bool {
        self.outermost
    }

    /// Release the scope entry. Runs once; later calls are no-ops.
    pub fn exit(&mut self) {
        if !self.outermost {
            return;
        }
        self.outermost = false;
        if let Some(scope) = self.scope {
            if scope.take().is_none() {
                info!("{}", TrackingError::CleanupRace);
            }
        }
    }
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        self.exit();
    }
}
