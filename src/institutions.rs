//! Institution Directory.
//!
//! Loaded once from the fixture store at engine construction, read-only
//! afterward. Each institution declares which MFA challenges it can issue;
//! the linking state machine picks the active challenge from that set.

use rustc_hash::FxHashMap;
use serde_json::Value;
use std::fmt;
use tracing::debug;

use crate::error::LinkError;
use crate::fixtures::FixtureStore;

/// MFA challenge kinds an institution can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MfaKind {
    /// Shared-secret code delivered out of band.
    Code,
    /// Single fixed-answer security question.
    Questions3,
    /// Unordered selection set.
    Selections,
}

impl MfaKind {
    /// Fixture spelling for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            MfaKind::Code => "code",
            MfaKind::Questions3 => "questions(3)",
            MfaKind::Selections => "selections",
        }
    }

    /// Parse the fixture spelling.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "code" => Some(MfaKind::Code),
            "questions(3)" => Some(MfaKind::Questions3),
            "selections" => Some(MfaKind::Selections),
            _ => None,
        }
    }
}

impl fmt::Display for MfaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A simulated financial institution.
#[derive(Debug, Clone)]
pub struct Institution {
    pub id: String,
    pub name: String,
    mfa: Vec<MfaKind>,
}

impl Institution {
    /// Whether this institution declares the given MFA kind.
    #[inline]
    pub fn declares(&self, kind: MfaKind) -> bool {
        self.mfa.contains(&kind)
    }

    /// Whether any MFA challenge is declared at all.
    #[inline]
    pub fn has_mfa(&self) -> bool {
        !self.mfa.is_empty()
    }

    /// Declared kinds, in fixture order.
    pub fn mfa(&self) -> &[MfaKind] {
        &self.mfa
    }
}

/// Read-only id -> institution lookup built from the `institutions` fixture.
#[derive(Debug, Clone)]
pub struct InstitutionDirectory {
    by_id: FxHashMap<String, Institution>,
    /// The raw document, returned verbatim by `institutions()`.
    raw: Value,
}

impl InstitutionDirectory {
    /// Build the directory. Duplicate ids and unknown MFA spellings are
    /// packaging defects and fail the load.
    pub fn load(fixtures: &FixtureStore) -> Result<Self, LinkError> {
        let raw = fixtures.get("institutions")?;
        let entries = raw
            .as_array()
            .ok_or_else(|| LinkError::BadInstitutionsFixture("expected a JSON array".into()))?;

        let mut by_id = FxHashMap::default();
        for entry in entries {
            let id = entry
                .get("type")
                .and_then(Value::as_str)
                .ok_or_else(|| LinkError::BadInstitutionsFixture("entry without a type".into()))?;
            let name = entry
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or(id)
                .to_string();

            let mut mfa = Vec::new();
            if let Some(kinds) = entry.get("mfa").and_then(Value::as_array) {
                for kind in kinds {
                    let spelling = kind.as_str().ok_or_else(|| {
                        LinkError::BadInstitutionsFixture(format!("{id}: non-string mfa entry"))
                    })?;
                    let parsed = MfaKind::parse(spelling).ok_or_else(|| {
                        LinkError::BadInstitutionsFixture(format!(
                            "{id}: unknown mfa kind {spelling}"
                        ))
                    })?;
                    mfa.push(parsed);
                }
            }

            let institution = Institution {
                id: id.to_string(),
                name,
                mfa,
            };
            if by_id.insert(id.to_string(), institution).is_some() {
                return Err(LinkError::BadInstitutionsFixture(format!(
                    "duplicate institution id: {id}"
                )));
            }
        }

        debug!(count = by_id.len(), "institution directory loaded");
        Ok(Self { by_id, raw })
    }

    /// Lookup by institution id. Absence is a caller-usage violation, not a
    /// simulated API error.
    pub fn lookup(&self, id: &str) -> Result<&Institution, LinkError> {
        self.by_id
            .get(id)
            .ok_or_else(|| LinkError::UnknownInstitution(id.to_string()))
    }

    /// The raw institutions document.
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
