//! Error taxonomy for the linking mock.
//!
//! Only one of the two failure classes lives here:
//!
//! - Caller-usage violations: the harness drove the mock in a way no real
//!   client could through normal use (unknown test username, unknown
//!   institution, undecodable continuation token, ...). These abort the
//!   call with an `Err`.
//! - Simulated domain errors (bad password, bad MFA answer, declared
//!   institution faults) are NOT errors: they are ordinary `MockResponse`
//!   values carrying an error-status fixture.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LinkError {
    /// Username is not one of the recognized test usernames.
    #[error("unknown test username: {0}")]
    UnknownUsername(String),

    /// Institution id is not present in the directory.
    #[error("unknown institution: {0}")]
    UnknownInstitution(String),

    /// Upgrade target other than the single supported kind.
    #[error("unsupported upgrade target: {0}")]
    UnsupportedUpgrade(String),

    /// Continuation token failed to decode.
    #[error("invalid continuation token: {0}")]
    InvalidToken(String),

    /// `send_method` was required but absent from options.
    #[error("missing send_method in options")]
    MissingSendMethod,

    /// `send_method` mask or type not present in the fixed delivery table.
    #[error("unknown delivery method: {0}")]
    UnknownSendMethod(String),

    /// A fixture name constructed by the state machine has no document.
    /// Packaging defect, not a caller mistake: the machine only builds
    /// names from closed enumerations.
    #[error("missing fixture: {0}")]
    MissingFixture(String),

    /// An embedded fixture document failed to parse. Packaging defect.
    #[error("unparseable fixture {name}: {source}")]
    BadFixture {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    /// The institutions document violates its invariants (duplicate id,
    /// unknown MFA spelling, wrong shape). Packaging defect.
    #[error("bad institutions fixture: {0}")]
    BadInstitutionsFixture(String),
}
