//! Authentication attempt ledger.
//!
//! Every password check reached through the [`Authenticator`] is recorded as an
//! [`AttemptRecord`]: created `pending` by the outermost authentication layer,
//! finalized exactly once with the outcome of the check. Right before the real
//! credential check, the [`TrustEvaluator`] looks at recent failures and the
//! trust list and refuses untrusted callers with a `banned` denial.
//!
//! Attempt writes are committed independently of the caller's own transaction,
//! so a denied login that rolls back its unit of work still leaves its failure
//! in the ledger.

pub mod authenticator;
pub mod error;
pub mod geo;
pub mod pg;
pub mod scope;
pub mod settings;
pub mod store;
pub mod tracker;
pub mod trust;
pub mod trust_list;
pub mod types;

pub use authenticator::{Authenticator, CredentialVerifier, Principal};
pub use error::{AuthError, DenialReason, TrackingError};
pub use scope::{AttemptGuard, CallScope, RequestContext};
pub use settings::{SettingsProvider, StaticSettings, TrustSettings};
pub use store::{AttemptStore, MemoryAttemptStore};
pub use tracker::AttemptTracker;
pub use trust::{TrustDecision, TrustEvaluator};
pub use trust_list::{MemoryTrustList, TrustListStore};
pub use types::{AttemptId, AttemptRecord, AttemptResult, TrustListEntry, TrustSubject};
