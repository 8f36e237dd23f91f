use super::handlers::{attempts, health, login, trust};
use crate::ledger::{
    authenticator::Principal,
    error::DenialReason,
    types::{
        AttemptRecord, AttemptResult, NewTrustListEntry, TrustListEntry, TrustListKind,
        TrustSubject,
    },
};
use utoipa::{
    openapi::{Contact, License},
    OpenApi,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        login::login,
        attempts::list_attempts,
        attempts::whitelist_attempt,
        trust::list_entries,
        trust::add_entry,
        trust::remove_entry,
    ),
    components(schemas(
        health::Health,
        login::LoginRequest,
        login::Denial,
        Principal,
        DenialReason,
        AttemptRecord,
        AttemptResult,
        TrustListEntry,
        NewTrustListEntry,
        TrustListKind,
        TrustSubject,
    )),
    tags(
        (name = "health", description = "Service health"),
        (name = "auth", description = "Tracked password login"),
        (name = "admin", description = "Attempt ledger and trust list administration"),
    )
)]
struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();
    doc.info.title = env!("CARGO_PKG_NAME").to_string();
    doc.info.version = env!("CARGO_PKG_VERSION").to_string();
    doc.info.description = Some(env!("CARGO_PKG_DESCRIPTION").to_string());
    doc.info.contact = cargo_contact();
    doc.info.license = Some(License::new(env!("CARGO_PKG_LICENSE")));
    doc
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let primary = env!("CARGO_PKG_AUTHORS").split(';').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let mut contact = Contact::new();
    match primary.split_once('<') {
        Some((name, email)) => {
            contact.name = Some(name.trim().to_string()).filter(|name| !name.is_empty());
            contact.email = Some(email.trim_end_matches('>').trim().to_string());
        }
        None => contact.name = Some(primary.to_string()),
    }
    Some(contact)
}
