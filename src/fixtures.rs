//! Fixture Resolver: embedded canned response documents.
//!
//! Documents are compiled in (`include_str!`) and parsed once when the
//! store is built. Lookup never touches the filesystem, which keeps the
//! mock deterministic and safe for concurrent readers.

use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::error::LinkError;

/// Raw embedded documents, keyed by logical fixture name.
static RAW_FIXTURES: Lazy<FxHashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut m = FxHashMap::default();
    m.insert("institutions", include_str!("../fixtures/institutions.json"));
    m.insert(
        "connect/success",
        include_str!("../fixtures/connect/success.json"),
    );
    m.insert(
        "connect/no_transactions",
        include_str!("../fixtures/connect/no_transactions.json"),
    );
    m.insert(
        "connect/questions",
        include_str!("../fixtures/connect/questions.json"),
    );
    m.insert(
        "connect/selections",
        include_str!("../fixtures/connect/selections.json"),
    );
    m.insert(
        "connect/code_email",
        include_str!("../fixtures/connect/code_email.json"),
    );
    m.insert(
        "connect/code_phone",
        include_str!("../fixtures/connect/code_phone.json"),
    );
    m.insert(
        "connect/code_list",
        include_str!("../fixtures/connect/code_list.json"),
    );
    m.insert(
        "connect/invalid_password",
        include_str!("../fixtures/connect/invalid_password.json"),
    );
    m.insert(
        "connect/invalid_mfa",
        include_str!("../fixtures/connect/invalid_mfa.json"),
    );
    m.insert(
        "connect/account_locked",
        include_str!("../fixtures/connect/account_locked.json"),
    );
    m.insert(
        "connect/account_not_setup",
        include_str!("../fixtures/connect/account_not_setup.json"),
    );
    m.insert(
        "connect/account_not_supported",
        include_str!("../fixtures/connect/account_not_supported.json"),
    );
    m.insert(
        "connect/not_responding",
        include_str!("../fixtures/connect/not_responding.json"),
    );
    m.insert(
        "upgrade/success",
        include_str!("../fixtures/upgrade/success.json"),
    );
    m.insert(
        "webhook/initial",
        include_str!("../fixtures/webhook/initial.json"),
    );
    m.insert(
        "webhook/historical",
        include_str!("../fixtures/webhook/historical.json"),
    );
    m
});

/// Key-value lookup over the canned payload documents.
#[derive(Debug, Clone)]
pub struct FixtureStore {
    docs: FxHashMap<String, Value>,
}

impl FixtureStore {
    /// Parse every embedded document up front. A parse failure is a
    /// packaging defect and surfaces here rather than at first use.
    pub fn new() -> Result<Self, LinkError> {
        let mut docs = FxHashMap::default();
        for (name, raw) in RAW_FIXTURES.iter() {
            let doc: Value = serde_json::from_str(raw).map_err(|source| LinkError::BadFixture {
                name: (*name).to_string(),
                source,
            })?;
            docs.insert((*name).to_string(), doc);
        }
        Ok(Self { docs })
    }

    /// Fetch a document by name. The state machine only constructs names
    /// from closed enumerations, so an unknown name is a packaging defect.
    pub fn get(&self, name: &str) -> Result<Value, LinkError> {
        self.docs
            .get(name)
            .cloned()
            .ok_or_else(|| LinkError::MissingFixture(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.docs.contains_key(name)
    }
}

/// Splice session-specific values into a resolved document.
///
/// - `access_token`: replaced with the continuation token when the document
///   declares the placeholder key. Pending-MFA documents carry no such key,
///   so they never pick up a token.
/// - `accounts[]._id`: prefixed with the account type, mirroring the real
///   service's per-institution account ids.
pub fn personalize(doc: &mut Value, token: &str, account_type: &str) {
    if let Some(slot) = doc.get_mut("access_token") {
        *slot = Value::String(token.to_string());
    }
    if let Some(accounts) = doc.get_mut("accounts").and_then(Value::as_array_mut) {
        for account in accounts {
            if let Some(id) = account.get("_id").and_then(Value::as_str) {
                let prefixed = format!("{account_type}{id}");
                account["_id"] = Value::String(prefixed);
            }
        }
    }
}
