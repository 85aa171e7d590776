//! mocklink - Deterministic mock of a bank-account-linking API
//!
//! Accepts the same request shapes as the real aggregation service and
//! returns canned, institution-specific responses chosen by a small
//! decision procedure over username/password/MFA inputs and institution
//! metadata. Built for exercising client integrations without live
//! credentials.
//!
//! # Modules
//!
//! - [`error`] - Caller-usage violations vs. packaging defects
//! - [`fixtures`] - Embedded canned response documents
//! - [`institutions`] - Institution directory (id -> MFA capability set)
//! - [`session`] - Linking sessions and the continuation-token codec
//! - [`response`] - Response payloads + status classification
//! - [`linking`] - The account-linking state machine
//! - [`webhook`] - Fire-and-forget notification delivery

pub mod error;
pub mod fixtures;
pub mod institutions;
pub mod linking;
pub mod response;
pub mod session;
pub mod webhook;

// Convenient re-exports at crate root
pub use error::LinkError;
pub use fixtures::FixtureStore;
pub use institutions::{Institution, InstitutionDirectory, MfaKind};
pub use linking::{
    ERROR_PASSWORDS, GOOD_PASSWORD, LinkOptions, LinkingEngine, SELECTIONS_USERNAME, SendMethod,
    TEST_USERNAMES, UPGRADE_TARGET,
};
pub use response::{MockResponse, StatusClass};
pub use session::{AccountSession, SessionCodec, SessionTable, StatelessCodec, TOKEN_MARKER};
pub use webhook::{
    HttpWebhookSender, NullWebhookSender, RecordingWebhookSender, WebhookKind, WebhookSender,
};
