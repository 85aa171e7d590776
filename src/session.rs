//! Account-linking sessions and the continuation-token codec.
//!
//! A session is the unit of identity threaded through the multi-step
//! linking protocol. The codec turns it into an opaque token and back.
//! Two designs satisfy the contract:
//!
//! - [`StatelessCodec`]: the token IS the session (sorted-key JSON behind a
//!   fixed marker). No shared state; multi-instance safe with zero
//!   coordination.
//! - [`SessionTable`]: the token is a surrogate key into an in-process
//!   table. Alternate design; carries its own synchronization.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use rustc_hash::FxHashMap;

use crate::error::LinkError;

/// Marker prefixing every continuation token.
pub const TOKEN_MARKER: &str = "test_";

/// One in-progress or completed linking attempt.
///
/// `account_type` is immutable once the session exists. `webhook` is only
/// ever populated when `login_only` is set; the linking engine enforces the
/// asymmetry at session creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSession {
    pub account_type: String,
    pub username: String,
    #[serde(default)]
    pub login_only: bool,
    #[serde(default)]
    pub webhook: Option<String>,
}

/// Session <-> token conversion contract.
///
/// Decoding a token must deterministically reproduce the session that
/// produced it.
pub trait SessionCodec: Send + Sync {
    fn encode(&self, session: &AccountSession) -> String;
    fn decode(&self, token: &str) -> Result<AccountSession, LinkError>;
}

/// Stateless codec: the token carries the serialized session itself.
///
/// Serialization goes through `serde_json::Value`, whose object map is
/// BTreeMap-backed: keys come out sorted, so equal sessions always encode
/// to byte-identical tokens.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatelessCodec;

impl SessionCodec for StatelessCodec {
    fn encode(&self, session: &AccountSession) -> String {
        // Infallible: the session holds only JSON-representable fields.
        let value = serde_json::to_value(session).expect("session serializes to JSON");
        format!("{TOKEN_MARKER}{value}")
    }

    fn decode(&self, token: &str) -> Result<AccountSession, LinkError> {
        let body = token
            .strip_prefix(TOKEN_MARKER)
            .ok_or_else(|| LinkError::InvalidToken(token.to_string()))?;
        serde_json::from_str(body).map_err(|_| LinkError::InvalidToken(token.to_string()))
    }
}

/// Stateful codec: surrogate keys into a process-wide session table.
///
/// Tokens look like `test_7`. Keys are assigned from a monotonic counter;
/// the table sits behind a mutex so the engine stays `Sync`.
#[derive(Debug)]
pub struct SessionTable {
    next_id: AtomicU64,
    sessions: Mutex<FxHashMap<u64, AccountSession>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            sessions: Mutex::new(FxHashMap::default()),
        }
    }

    /// Number of sessions currently held.
    pub fn len(&self) -> usize {
        self.sessions.lock().expect("session table lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionCodec for SessionTable {
    fn encode(&self, session: &AccountSession) -> String {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.sessions
            .lock()
            .expect("session table lock poisoned")
            .insert(id, session.clone());
        format!("{TOKEN_MARKER}{id}")
    }

    fn decode(&self, token: &str) -> Result<AccountSession, LinkError> {
        let body = token
            .strip_prefix(TOKEN_MARKER)
            .ok_or_else(|| LinkError::InvalidToken(token.to_string()))?;
        let id: u64 = body
            .parse()
            .map_err(|_| LinkError::InvalidToken(token.to_string()))?;
        self.sessions
            .lock()
            .expect("session table lock poisoned")
            .get(&id)
            .cloned()
            .ok_or_else(|| LinkError::InvalidToken(token.to_string()))
    }
}
