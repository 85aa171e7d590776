//! End-to-end flows through the linking state machine, driven the way a
//! client-library test suite drives the real service.

use std::sync::Arc;

use mocklink::{
    GOOD_PASSWORD, LinkError, LinkOptions, LinkingEngine, NullWebhookSender,
    RecordingWebhookSender, SELECTIONS_USERNAME, SendMethod, SessionTable, StatelessCodec,
    StatusClass, TOKEN_MARKER, WebhookKind,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .try_init();
}

fn engine() -> LinkingEngine {
    init_tracing();
    LinkingEngine::new().expect("engine builds from embedded fixtures")
}

fn engine_with_recorder() -> (LinkingEngine, RecordingWebhookSender) {
    init_tracing();
    let recorder = RecordingWebhookSender::new();
    let engine = LinkingEngine::with_parts(Arc::new(StatelessCodec), Arc::new(recorder.clone()))
        .expect("engine builds from embedded fixtures");
    (engine, recorder)
}

fn login_only_options(webhook: Option<&str>) -> LinkOptions {
    LinkOptions {
        login_only: true,
        webhook: webhook.map(String::from),
        ..LinkOptions::default()
    }
}

// ============================================================================
// connect
// ============================================================================

#[test]
fn connect_without_declared_mfa_always_succeeds() {
    let engine = engine();
    let listing = engine.institutions();
    assert_eq!(listing.status_code(), 200);

    for entry in listing.data.as_array().unwrap() {
        let declared = entry["mfa"].as_array().unwrap();
        if !declared.is_empty() {
            continue;
        }
        let id = entry["type"].as_str().unwrap();
        let res = engine
            .connect(id, "plaid_test", GOOD_PASSWORD, &LinkOptions::default())
            .unwrap();
        assert_eq!(
            res.status,
            StatusClass::Success,
            "{} declares no MFA and must link immediately",
            id
        );
        assert!(res.token().unwrap().starts_with(TOKEN_MARKER));
    }
}

#[test]
fn connect_prefixes_account_ids_with_account_type() {
    let engine = engine();
    let res = engine
        .connect("amex", "plaid_test", GOOD_PASSWORD, &LinkOptions::default())
        .unwrap();
    for account in res.data["accounts"].as_array().unwrap() {
        let id = account["_id"].as_str().unwrap();
        assert!(id.starts_with("amex"), "account id {} not prefixed", id);
    }
}

#[test]
fn connect_error_password_returns_declared_fault_without_token() {
    let engine = engine();
    let res = engine
        .connect("amex", "plaid_test", "account_locked", &LinkOptions::default())
        .unwrap();
    assert_eq!(res.status_code(), 402);
    assert_eq!(res.data["code"], 1205);
    assert_eq!(res.token(), None, "error responses must not carry a token");
}

#[test]
fn connect_unrecognized_password_coerces_to_invalid_password() {
    let engine = engine();
    let res = engine
        .connect("amex", "plaid_test", "hunter2", &LinkOptions::default())
        .unwrap();
    assert_eq!(res.status_code(), 402);
    assert_eq!(res.data["code"], 1200);
}

#[test]
fn connect_rejects_unknown_username_loudly() {
    let engine = engine();
    let err = engine
        .connect("amex", "bob", GOOD_PASSWORD, &LinkOptions::default())
        .unwrap_err();
    assert!(matches!(err, LinkError::UnknownUsername(_)));
}

#[test]
fn connect_rejects_unknown_institution_loudly() {
    let engine = engine();
    let err = engine
        .connect("narnia", "plaid_test", GOOD_PASSWORD, &LinkOptions::default())
        .unwrap_err();
    assert!(matches!(err, LinkError::UnknownInstitution(_)));
}

#[test]
fn wells_gets_the_reduced_success_fixture() {
    let engine = engine();
    let res = engine
        .connect("wells", "plaid_test", GOOD_PASSWORD, &LinkOptions::default())
        .unwrap();
    assert_eq!(res.status, StatusClass::Success);
    assert!(
        res.data.get("transactions").is_none(),
        "wells success payload never defines transactions"
    );
    let first = &res.data["accounts"][0]["_id"];
    assert!(first.as_str().unwrap().starts_with("wells"));
}

// ============================================================================
// MFA challenge selection
// ============================================================================

#[test]
fn code_institution_challenges_with_single_method_by_default() {
    let engine = engine();
    let res = engine
        .connect("chase", "plaid_test", GOOD_PASSWORD, &LinkOptions::default())
        .unwrap();
    assert_eq!(res.status_code(), 201);
    assert_eq!(res.data["type"], "device");
    assert_eq!(res.token(), None, "pending MFA must not carry a token");
}

#[test]
fn code_institution_lists_delivery_methods_on_request() {
    let engine = engine();
    let options = LinkOptions {
        list: true,
        ..LinkOptions::default()
    };
    let res = engine
        .connect("chase", "plaid_test", GOOD_PASSWORD, &options)
        .unwrap();
    assert_eq!(res.status_code(), 201);
    assert_eq!(res.data["type"], "list");
    assert_eq!(res.data["mfa"].as_array().unwrap().len(), 2);
}

#[test]
fn challenge_priority_prefers_selections_then_questions() {
    let engine = engine();

    // "us" declares selections + questions(3) + code.
    let res = engine
        .connect("us", SELECTIONS_USERNAME, GOOD_PASSWORD, &LinkOptions::default())
        .unwrap();
    assert_eq!(res.data["type"], "selections");

    let res = engine
        .connect("us", "plaid_test", GOOD_PASSWORD, &LinkOptions::default())
        .unwrap();
    assert_eq!(res.data["type"], "questions");

    // "usaa" declares questions(3) + code; questions wins.
    let res = engine
        .connect("usaa", "plaid_test", GOOD_PASSWORD, &LinkOptions::default())
        .unwrap();
    assert_eq!(res.data["type"], "questions");
}

// ============================================================================
// connect_step
// ============================================================================

#[test]
fn questions_flow_links_on_the_fixed_answer() {
    let engine = engine();

    let pending = engine
        .connect("bofa", "plaid_test", GOOD_PASSWORD, &LinkOptions::default())
        .unwrap();
    assert_eq!(pending.status_code(), 201);
    assert_eq!(pending.data["type"], "questions");

    let res = engine
        .connect_step("bofa", Some("tomato"), &LinkOptions::default())
        .unwrap();
    assert_eq!(res.status, StatusClass::Success);
    assert!(res.token().unwrap().starts_with(TOKEN_MARKER));
    assert!(res.data.get("transactions").is_some());
}

#[test]
fn wrong_question_answer_yields_invalid_mfa() {
    let engine = engine();
    let res = engine
        .connect_step("bofa", Some("potato"), &LinkOptions::default())
        .unwrap();
    assert_eq!(res.status_code(), 402);
    assert_eq!(res.data["code"], 1203);
    assert_eq!(res.token(), None);
}

#[test]
fn selections_answer_is_matched_as_a_set() {
    let engine = engine();

    for good in [
        r#"["tomato","ketchup"]"#,
        r#"["ketchup","tomato"]"#,
        r#"["ketchup","tomato","tomato"]"#,
    ] {
        let res = engine
            .connect_step("citi", Some(good), &LinkOptions::default())
            .unwrap();
        assert_eq!(res.status, StatusClass::Success, "answer {} must link", good);
    }

    for bad in [
        r#"["tomato"]"#,
        r#"["tomato","mustard"]"#,
        r#"["tomato","ketchup","mustard"]"#,
        r#"[]"#,
    ] {
        let res = engine
            .connect_step("citi", Some(bad), &LinkOptions::default())
            .unwrap();
        assert_eq!(res.status_code(), 402, "answer {} must be rejected", bad);
        assert_eq!(res.data["code"], 1203);
    }
}

#[test]
fn code_answer_must_match_exactly() {
    let engine = engine();

    let res = engine
        .connect_step("chase", Some("1234"), &LinkOptions::default())
        .unwrap();
    assert_eq!(res.status, StatusClass::Success);

    let res = engine
        .connect_step("chase", Some("0000"), &LinkOptions::default())
        .unwrap();
    assert_eq!(res.status_code(), 402);
}

#[test]
fn absent_answer_requests_a_new_delivery_method() {
    let engine = engine();

    let by_mask = LinkOptions {
        send_method: Some(SendMethod::by_mask("xxx-xxx-5309")),
        ..LinkOptions::default()
    };
    let res = engine.connect_step("chase", None, &by_mask).unwrap();
    assert_eq!(res.status_code(), 201);
    assert!(
        res.data["mfa"]["message"]
            .as_str()
            .unwrap()
            .contains("xxx-xxx-5309")
    );

    let by_type = LinkOptions {
        send_method: Some(SendMethod::by_type("email")),
        ..LinkOptions::default()
    };
    let res = engine.connect_step("chase", None, &by_type).unwrap();
    assert_eq!(res.status_code(), 201);
    assert!(
        res.data["mfa"]["message"]
            .as_str()
            .unwrap()
            .contains("t..t@plaid.com")
    );
}

#[test]
fn unknown_delivery_method_is_a_usage_violation() {
    let engine = engine();

    let unknown = LinkOptions {
        send_method: Some(SendMethod::by_mask("xxx-xxx-0000")),
        ..LinkOptions::default()
    };
    let err = engine.connect_step("chase", None, &unknown).unwrap_err();
    assert!(matches!(err, LinkError::UnknownSendMethod(_)));

    let err = engine
        .connect_step("chase", None, &LinkOptions::default())
        .unwrap_err();
    assert!(matches!(err, LinkError::MissingSendMethod));
}

// ============================================================================
// login-only truncation and webhooks
// ============================================================================

#[test]
fn login_only_strips_transactions_from_the_success_payload() {
    let engine = engine();

    let res = engine
        .connect("amex", "plaid_test", GOOD_PASSWORD, &login_only_options(None))
        .unwrap();
    assert_eq!(res.status, StatusClass::Success);
    assert!(res.data.get("transactions").is_none());

    let res = engine
        .connect("amex", "plaid_test", GOOD_PASSWORD, &LinkOptions::default())
        .unwrap();
    assert!(res.data.get("transactions").is_some());
}

#[test]
fn webhooks_fire_iff_login_only_with_a_url() {
    let (engine, recorder) = engine_with_recorder();

    // webhook without login_only: suppressed.
    let options = LinkOptions {
        webhook: Some("http://127.0.0.1:9999/hook".to_string()),
        ..LinkOptions::default()
    };
    engine
        .connect("amex", "plaid_test", GOOD_PASSWORD, &options)
        .unwrap();
    assert!(recorder.sent().is_empty(), "webhook must require login_only");

    // login_only without a url: nothing to deliver.
    engine
        .connect("amex", "plaid_test", GOOD_PASSWORD, &login_only_options(None))
        .unwrap();
    assert!(recorder.sent().is_empty());

    // Both set: initial then historical, token spliced into each payload.
    let res = engine
        .connect(
            "amex",
            "plaid_test",
            GOOD_PASSWORD,
            &login_only_options(Some("http://127.0.0.1:9999/hook")),
        )
        .unwrap();
    let token = res.token().unwrap();

    let sent = recorder.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].0, "http://127.0.0.1:9999/hook");
    assert_eq!(sent[0].1, WebhookKind::Initial);
    assert_eq!(sent[1].1, WebhookKind::Historical);
    assert_eq!(sent[0].2["access_token"], token);
    assert_eq!(sent[1].2["access_token"], token);
}

#[test]
fn connect_step_success_dispatches_webhooks_too() {
    let (engine, recorder) = engine_with_recorder();

    let res = engine
        .connect_step(
            "bofa",
            Some("tomato"),
            &login_only_options(Some("http://127.0.0.1:9999/hook")),
        )
        .unwrap();
    assert_eq!(res.status, StatusClass::Success);
    assert!(
        res.data.get("transactions").is_none(),
        "login-only truncation applies on the step path as well"
    );

    let sent = recorder.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].1, WebhookKind::Initial);
    assert_eq!(sent[1].1, WebhookKind::Historical);
}

// ============================================================================
// upgrade / upgrade_step
// ============================================================================

#[test]
fn upgrade_rechallenges_like_a_fresh_connect() {
    let engine = engine();

    let token = engine
        .connect_step("chase", Some("1234"), &LinkOptions::default())
        .unwrap()
        .token()
        .unwrap()
        .to_string();

    let res = engine
        .upgrade(&token, "auth", &LinkOptions::default())
        .unwrap();
    assert_eq!(res.status_code(), 201);
    assert_eq!(res.data["type"], "device");

    let res = engine
        .upgrade_step(&token, "auth", "1234", &LinkOptions::default())
        .unwrap();
    assert_eq!(res.status, StatusClass::Success);
    assert_eq!(res.token(), Some(token.as_str()), "token reattached unchanged");
    assert!(res.data["accounts"][0]["numbers"].is_object());
}

#[test]
fn upgrade_respects_the_session_username_for_selections() {
    let engine = engine();

    // Linking "us" with a selections answer records the opt-in username in
    // the session, so the upgrade re-challenge presents selections again.
    let token = engine
        .connect_step("us", Some(r#"["tomato","ketchup"]"#), &LinkOptions::default())
        .unwrap()
        .token()
        .unwrap()
        .to_string();

    let res = engine
        .upgrade(&token, "auth", &LinkOptions::default())
        .unwrap();
    assert_eq!(res.status_code(), 201);
    assert_eq!(res.data["type"], "selections");
}

#[test]
fn upgrade_without_mfa_returns_upgrade_success() {
    let engine = engine();

    let token = engine
        .connect("amex", "plaid_test", GOOD_PASSWORD, &LinkOptions::default())
        .unwrap()
        .token()
        .unwrap()
        .to_string();

    let res = engine
        .upgrade(&token, "auth", &LinkOptions::default())
        .unwrap();
    assert_eq!(res.status, StatusClass::Success);
    assert_eq!(res.token(), Some(token.as_str()));
}

#[test]
fn upgrade_step_wrong_answer_yields_invalid_mfa() {
    let engine = engine();

    let token = engine
        .connect_step("chase", Some("1234"), &LinkOptions::default())
        .unwrap()
        .token()
        .unwrap()
        .to_string();

    let res = engine
        .upgrade_step(&token, "auth", "wrong-answer", &LinkOptions::default())
        .unwrap();
    assert_eq!(res.status_code(), 402);
    assert_eq!(res.data["code"], 1203);
}

#[test]
fn upgrade_step_rejects_unsupported_targets_loudly() {
    let engine = engine();

    let token = engine
        .connect("amex", "plaid_test", GOOD_PASSWORD, &LinkOptions::default())
        .unwrap()
        .token()
        .unwrap()
        .to_string();

    let err = engine
        .upgrade_step(&token, "credit", "1234", &LinkOptions::default())
        .unwrap_err();
    assert!(matches!(err, LinkError::UnsupportedUpgrade(_)));
}

// ============================================================================
// transactions / delete_connect / tokens
// ============================================================================

#[test]
fn transactions_keeps_history_even_for_login_only_sessions() {
    let engine = engine();

    let token = engine
        .connect("amex", "plaid_test", GOOD_PASSWORD, &login_only_options(None))
        .unwrap()
        .token()
        .unwrap()
        .to_string();

    let res = engine
        .transactions(&token, &LinkOptions::default())
        .unwrap();
    assert_eq!(res.status, StatusClass::Success);
    assert!(res.data.get("transactions").is_some());
    assert_eq!(res.token(), Some(token.as_str()), "token reattached unchanged");
}

#[test]
fn transactions_honors_the_wells_reduced_fixture() {
    let engine = engine();

    let token = engine
        .connect("wells", "plaid_test", GOOD_PASSWORD, &LinkOptions::default())
        .unwrap()
        .token()
        .unwrap()
        .to_string();

    let res = engine
        .transactions(&token, &LinkOptions::default())
        .unwrap();
    assert!(res.data.get("transactions").is_none());
}

#[test]
fn delete_connect_returns_an_empty_document() {
    let engine = engine();

    let token = engine
        .connect("amex", "plaid_test", GOOD_PASSWORD, &LinkOptions::default())
        .unwrap()
        .token()
        .unwrap()
        .to_string();

    let res = engine.delete_connect(&token).unwrap();
    assert_eq!(res.status, StatusClass::Success);
    assert_eq!(res.data, serde_json::json!({}));
}

#[test]
fn malformed_tokens_are_usage_violations() {
    let engine = engine();
    let err = engine
        .transactions("bogus", &LinkOptions::default())
        .unwrap_err();
    assert!(matches!(err, LinkError::InvalidToken(_)));
}

// ============================================================================
// stateful codec variant
// ============================================================================

#[test]
fn session_table_codec_supports_the_same_flows() {
    init_tracing();
    let engine = LinkingEngine::with_parts(
        Arc::new(SessionTable::new()),
        Arc::new(NullWebhookSender),
    )
    .unwrap();

    let res = engine
        .connect("amex", "plaid_test", GOOD_PASSWORD, &LinkOptions::default())
        .unwrap();
    let token = res.token().unwrap().to_string();
    assert_eq!(token, "test_1", "surrogate keys start at 1");

    let res = engine
        .transactions(&token, &LinkOptions::default())
        .unwrap();
    assert_eq!(res.status, StatusClass::Success);
    assert_eq!(res.token(), Some(token.as_str()));

    let err = engine
        .transactions("test_999", &LinkOptions::default())
        .unwrap_err();
    assert!(matches!(err, LinkError::InvalidToken(_)));
}
