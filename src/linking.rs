//! The account-linking state machine.
//!
//! This is the part of the mock with real control flow: given an
//! institution's declared MFA capabilities and the caller's credentials or
//! step answers, pick the canned response, classify its status, mint or
//! reattach the continuation token, and fire side-channel notifications.
//!
//! The decision tables (sentinel credentials, challenge priority,
//! delivery-method masks) live as data at the top of the module so the
//! contract stays auditable.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::LinkError;
use crate::fixtures::{self, FixtureStore};
use crate::institutions::{Institution, InstitutionDirectory, MfaKind};
use crate::response::MockResponse;
use crate::session::{AccountSession, SessionCodec, StatelessCodec};
use crate::webhook::{NullWebhookSender, WebhookKind, WebhookSender};

// ============================================================================
// Decision tables
// ============================================================================

/// The only password that links successfully.
pub const GOOD_PASSWORD: &str = "plaid_good";

/// Usernames the mock recognizes; anything else is a harness bug.
pub const TEST_USERNAMES: [&str; 2] = ["plaid_test", "plaid_selections"];

/// The username that opts into selection-set challenges.
pub const SELECTIONS_USERNAME: &str = "plaid_selections";

const DEFAULT_USERNAME: &str = "plaid_test";

/// Passwords that simulate a declared institution fault. Any other non-good
/// password coerces to `invalid_password`.
pub const ERROR_PASSWORDS: [&str; 4] = [
    "account_locked",
    "account_not_supported",
    "account_not_setup",
    "not_responding",
];

/// The one upgrade kind the mock supports.
pub const UPGRADE_TARGET: &str = "auth";

/// Expected MFA answers.
const CODE_ANSWER: &str = "1234";
const QUESTION_ANSWER: &str = "tomato";
const SELECTION_ANSWERS: [&str; 2] = ["tomato", "ketchup"];

/// Institutions served the reduced success fixture (no transaction data).
const NO_TRANSACTIONS_INSTITUTIONS: [&str; 1] = ["wells"];

/// Challenge priority: the first declared kind that applies wins.
const CHALLENGE_PRIORITY: [MfaKind; 3] = [MfaKind::Selections, MfaKind::Questions3, MfaKind::Code];

/// Fixed mask -> delivery method table for `send_method` lookups.
fn method_for_mask(mask: &str) -> Option<&'static str> {
    match mask {
        "xxx-xxx-5309" => Some("phone"),
        "t..t@plaid.com" => Some("email"),
        _ => None,
    }
}

// ============================================================================
// Options
// ============================================================================

/// Per-call options recognized by the linking operations.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LinkOptions {
    /// Suppress transaction history in success payloads.
    pub login_only: bool,
    /// Notification URL. Honored only when `login_only` is set (a quirk of
    /// the original service, preserved deliberately).
    pub webhook: Option<String>,
    /// For code challenges: present the list of delivery methods instead of
    /// a single method.
    pub list: bool,
    /// Requested delivery method for a new code.
    pub send_method: Option<SendMethod>,
}

/// Delivery method request: an explicit method name, or a masked contact
/// string resolved through the fixed mask table.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SendMethod {
    Explicit {
        #[serde(rename = "type")]
        kind: String,
    },
    Masked {
        mask: String,
    },
}

impl SendMethod {
    pub fn by_type(kind: impl Into<String>) -> Self {
        SendMethod::Explicit { kind: kind.into() }
    }

    pub fn by_mask(mask: impl Into<String>) -> Self {
        SendMethod::Masked { mask: mask.into() }
    }
}

// ============================================================================
// Challenge selection and answer validation
// ============================================================================

/// Select the active challenge for a fresh connect or upgrade. First match
/// in priority order wins; `selections` only applies to the opt-in username.
fn select_challenge(institution: &Institution, username: &str) -> Option<MfaKind> {
    CHALLENGE_PRIORITY.into_iter().find(|&kind| match kind {
        MfaKind::Selections => username == SELECTIONS_USERNAME && institution.declares(kind),
        other => institution.declares(other),
    })
}

/// Validate a step answer against the institution's active challenge.
///
/// The `selections` branch is active when the institution declares it and
/// the answer parses as a JSON array (the only shape a selections answer
/// can take). Returns the matched kind, or `None` on mismatch.
fn check_answer(institution: &Institution, answer: &str) -> Option<MfaKind> {
    let active = CHALLENGE_PRIORITY.into_iter().find(|&kind| match kind {
        MfaKind::Selections => institution.declares(kind) && parse_selection_set(answer).is_some(),
        other => institution.declares(other),
    })?;

    let matches = match active {
        MfaKind::Selections => {
            parse_selection_set(answer).is_some_and(|set| set == expected_selection_set())
        }
        MfaKind::Questions3 => answer == QUESTION_ANSWER,
        MfaKind::Code => answer == CODE_ANSWER,
    };
    matches.then_some(active)
}

/// Parse a selections answer: a JSON array of strings, compared as a set
/// (order and duplicates irrelevant).
fn parse_selection_set(answer: &str) -> Option<HashSet<String>> {
    serde_json::from_str::<Vec<String>>(answer)
        .ok()
        .map(|answers| answers.into_iter().collect())
}

fn expected_selection_set() -> HashSet<String> {
    SELECTION_ANSWERS.iter().map(|s| s.to_string()).collect()
}

/// Resolve the delivery method requested in `options.send_method`.
fn requested_method(options: &LinkOptions) -> Result<&'static str, LinkError> {
    let Some(method) = options.send_method.as_ref() else {
        return Err(LinkError::MissingSendMethod);
    };
    match method {
        SendMethod::Masked { mask } => {
            method_for_mask(mask).ok_or_else(|| LinkError::UnknownSendMethod(mask.clone()))
        }
        SendMethod::Explicit { kind } => match kind.as_str() {
            "phone" => Ok("phone"),
            "email" => Ok("email"),
            other => Err(LinkError::UnknownSendMethod(other.to_string())),
        },
    }
}

// ============================================================================
// Engine
// ============================================================================

/// The linking state machine.
///
/// Owns the read-only directory and fixture store plus the injected session
/// codec and webhook capability. Under the default [`StatelessCodec`] every
/// operation is a pure function of its explicit inputs, so the engine can
/// be shared across threads with no locking.
pub struct LinkingEngine {
    fixtures: FixtureStore,
    directory: InstitutionDirectory,
    codec: Arc<dyn SessionCodec>,
    webhooks: Arc<dyn WebhookSender>,
}

impl LinkingEngine {
    /// Engine with the stateless codec and no webhook delivery.
    pub fn new() -> Result<Self, LinkError> {
        Self::with_parts(Arc::new(StatelessCodec), Arc::new(NullWebhookSender))
    }

    /// Engine with an explicit codec and webhook capability.
    pub fn with_parts(
        codec: Arc<dyn SessionCodec>,
        webhooks: Arc<dyn WebhookSender>,
    ) -> Result<Self, LinkError> {
        let fixtures = FixtureStore::new()?;
        let directory = InstitutionDirectory::load(&fixtures)?;
        Ok(Self {
            fixtures,
            directory,
            codec,
            webhooks,
        })
    }

    /// The raw institution list, verbatim. No personalization.
    pub fn institutions(&self) -> MockResponse {
        MockResponse::success(self.directory.raw().clone())
    }

    /// Begin a linking attempt.
    pub fn connect(
        &self,
        account_type: &str,
        username: &str,
        password: &str,
        options: &LinkOptions,
    ) -> Result<MockResponse, LinkError> {
        if !TEST_USERNAMES.contains(&username) {
            return Err(LinkError::UnknownUsername(username.to_string()));
        }
        let institution = self.directory.lookup(account_type)?;

        if password != GOOD_PASSWORD {
            // Unrecognized bad passwords coerce to the generic fixture.
            let fault = if ERROR_PASSWORDS.contains(&password) {
                password
            } else {
                "invalid_password"
            };
            debug!(institution = account_type, fault, "connect: simulated credential fault");
            let data = self.fixtures.get(&format!("connect/{fault}"))?;
            return Ok(MockResponse::error(data));
        }

        if institution.has_mfa() {
            let challenge = self.active_challenge(institution, username)?;
            debug!(
                institution = account_type,
                challenge = challenge.as_str(),
                "connect: MFA challenge issued"
            );
            let data = self.challenge_fixture(challenge, options)?;
            return Ok(MockResponse::mfa_required(data));
        }

        let session = self.new_session(account_type, username, options);
        self.finish_link(&session)
    }

    /// Answer (or re-request) the active MFA challenge for a fresh link.
    ///
    /// Without an answer this is a "send the code somewhere else" call;
    /// with an answer it is validated against the active challenge.
    pub fn connect_step(
        &self,
        account_type: &str,
        mfa: Option<&str>,
        options: &LinkOptions,
    ) -> Result<MockResponse, LinkError> {
        let institution = self.directory.lookup(account_type)?;

        let Some(answer) = mfa else {
            let method = requested_method(options)?;
            debug!(
                institution = account_type,
                method, "connect_step: new delivery method requested"
            );
            let data = self.fixtures.get(&format!("connect/code_{method}"))?;
            return Ok(MockResponse::mfa_required(data));
        };

        match check_answer(institution, answer) {
            Some(kind) => {
                debug!(
                    institution = account_type,
                    challenge = kind.as_str(),
                    "connect_step: MFA answer accepted"
                );
                // The username is not an input here; recover it from the
                // challenge that matched (only the opt-in username can reach
                // a selections challenge).
                let username = if kind == MfaKind::Selections {
                    SELECTIONS_USERNAME
                } else {
                    DEFAULT_USERNAME
                };
                let session = self.new_session(account_type, username, options);
                self.finish_link(&session)
            }
            None => {
                debug!(institution = account_type, "connect_step: MFA answer rejected");
                let data = self.fixtures.get("connect/invalid_mfa")?;
                Ok(MockResponse::error(data))
            }
        }
    }

    /// Re-challenge an existing link for an upgrade.
    ///
    /// Runs the same challenge selection as `connect` against the decoded
    /// session. Never applies login-only truncation or webhook dispatch;
    /// the incoming token is reattached unchanged wherever the chosen
    /// fixture carries a placeholder.
    pub fn upgrade(
        &self,
        token: &str,
        upgrade_to: &str,
        options: &LinkOptions,
    ) -> Result<MockResponse, LinkError> {
        let session = self.codec.decode(token)?;
        let institution = self.directory.lookup(&session.account_type)?;
        debug!(institution = %session.account_type, upgrade_to, "upgrade requested");

        if institution.has_mfa() {
            let challenge = self.active_challenge(institution, &session.username)?;
            let mut data = self.challenge_fixture(challenge, options)?;
            fixtures::personalize(&mut data, token, &session.account_type);
            return Ok(MockResponse::mfa_required(data));
        }

        let mut data = self.fixtures.get("upgrade/success")?;
        fixtures::personalize(&mut data, token, &session.account_type);
        Ok(MockResponse::success(data))
    }

    /// Answer the upgrade's MFA challenge.
    ///
    /// There is no "request a new delivery method" branch here; the answer
    /// is required.
    pub fn upgrade_step(
        &self,
        token: &str,
        upgrade_to: &str,
        mfa: &str,
        _options: &LinkOptions,
    ) -> Result<MockResponse, LinkError> {
        if upgrade_to != UPGRADE_TARGET {
            return Err(LinkError::UnsupportedUpgrade(upgrade_to.to_string()));
        }
        let session = self.codec.decode(token)?;
        let institution = self.directory.lookup(&session.account_type)?;

        match check_answer(institution, mfa) {
            Some(kind) => {
                debug!(
                    institution = %session.account_type,
                    challenge = kind.as_str(),
                    "upgrade_step: MFA answer accepted"
                );
                let mut data = self.fixtures.get("upgrade/success")?;
                fixtures::personalize(&mut data, token, &session.account_type);
                Ok(MockResponse::success(data))
            }
            None => {
                debug!(institution = %session.account_type, "upgrade_step: MFA answer rejected");
                let data = self.fixtures.get("connect/invalid_mfa")?;
                Ok(MockResponse::error(data))
            }
        }
    }

    /// Transaction history for an established link.
    ///
    /// Login-only truncation does not apply here: the original service
    /// returns history from this endpoint even for login-only sessions.
    pub fn transactions(
        &self,
        token: &str,
        _options: &LinkOptions,
    ) -> Result<MockResponse, LinkError> {
        let session = self.codec.decode(token)?;
        let mut data = self.success_fixture(&session.account_type)?;
        fixtures::personalize(&mut data, token, &session.account_type);
        Ok(MockResponse::success(data))
    }

    /// Tear down a link. The mock has nothing to delete; the call validates
    /// the token and returns an empty document.
    pub fn delete_connect(&self, token: &str) -> Result<MockResponse, LinkError> {
        self.codec.decode(token)?;
        Ok(MockResponse::success(serde_json::json!({})))
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Challenge for an institution that declares MFA. A declared set that
    /// matches no rule is a packaging defect in the institutions fixture.
    fn active_challenge(
        &self,
        institution: &Institution,
        username: &str,
    ) -> Result<MfaKind, LinkError> {
        select_challenge(institution, username).ok_or_else(|| {
            LinkError::BadInstitutionsFixture(format!(
                "{}: no applicable challenge for {username}",
                institution.id
            ))
        })
    }

    /// Fixture for the selected challenge kind.
    fn challenge_fixture(&self, kind: MfaKind, options: &LinkOptions) -> Result<Value, LinkError> {
        let name = match kind {
            MfaKind::Selections => "connect/selections",
            MfaKind::Questions3 => "connect/questions",
            MfaKind::Code if options.list => "connect/code_list",
            MfaKind::Code => "connect/code_email",
        };
        self.fixtures.get(name)
    }

    /// Success fixture for an account type, honoring the reduced-fixture
    /// rule.
    fn success_fixture(&self, account_type: &str) -> Result<Value, LinkError> {
        let name = if NO_TRANSACTIONS_INSTITUTIONS.contains(&account_type) {
            "connect/no_transactions"
        } else {
            "connect/success"
        };
        self.fixtures.get(name)
    }

    fn new_session(
        &self,
        account_type: &str,
        username: &str,
        options: &LinkOptions,
    ) -> AccountSession {
        AccountSession {
            account_type: account_type.to_string(),
            username: username.to_string(),
            login_only: options.login_only,
            // The webhook is only honored for login-only sessions.
            webhook: if options.login_only {
                options.webhook.clone()
            } else {
                None
            },
        }
    }

    /// Terminal success path shared by `connect` and `connect_step`: mint
    /// the token, personalize the success fixture, truncate for login-only,
    /// fire webhooks.
    fn finish_link(&self, session: &AccountSession) -> Result<MockResponse, LinkError> {
        let token = self.codec.encode(session);
        let mut data = self.success_fixture(&session.account_type)?;
        fixtures::personalize(&mut data, &token, &session.account_type);
        if session.login_only {
            if let Some(obj) = data.as_object_mut() {
                obj.remove("transactions");
            }
        }

        info!(
            institution = %session.account_type,
            login_only = session.login_only,
            "link established"
        );

        if let Some(url) = &session.webhook {
            self.dispatch_webhooks(url, &token, session)?;
        }
        Ok(MockResponse::success(data))
    }

    /// Initiate "initial" then "historical" notifications. Initiation order
    /// is guaranteed; completion is never observed by the request path.
    fn dispatch_webhooks(
        &self,
        url: &str,
        token: &str,
        session: &AccountSession,
    ) -> Result<(), LinkError> {
        for kind in [WebhookKind::Initial, WebhookKind::Historical] {
            let mut payload = self.fixtures.get(&format!("webhook/{}", kind.as_str()))?;
            fixtures::personalize(&mut payload, token, &session.account_type);
            self.webhooks.send(url, kind, payload);
        }
        debug!(url, "webhooks initiated");
        Ok(())
    }
}
