//! HTTP API Tests
//!
//! Exercises the router end to end against the in-memory ledger.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use coinforge_core::api::{create_router, AppState, WALLET_HEADER};
use coinforge_core::confirmation::{
    CommitmentLevel, ConfirmationError, ConfirmationWatcher, SignatureStatus, SignatureStatusSource,
    WatcherSettings,
};
use coinforge_core::ledger::{Ledger, LedgerSettings, MemoryLedgerStore};
use coinforge_core::rate_limit::RateLimitConfig;
use coinforge_core::telegram::{BroadcastSettings, GroupSender, TelegramError};

fn ledger() -> Arc<Ledger> {
    Arc::new(Ledger::new(
        Arc::new(MemoryLedgerStore::new()),
        LedgerSettings::default(),
    ))
}

fn app() -> Router {
    create_router(Arc::new(AppState::new(ledger())))
}

async fn call(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn site_request() -> Value {
    json!({
        "template": "neon",
        "content": {
            "coin_name": "Moon Cat",
            "ticker": "MCAT",
            "description": "Cats on the moon.",
            "telegram_url": "https://t.me/mooncat"
        }
    })
}

/// Test health and pricing need no credentials
#[tokio::test]
async fn test_public_endpoints() {
    let app = app();

    let (status, body) = call(&app, Method::GET, "/v1/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], coinforge_core::VERSION);

    let (status, body) = call(&app, Method::GET, "/v1/pricing", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["currency"], "SOL");
    assert_eq!(body["website_generation"], 0.5);
    assert_eq!(body["free_tier"]["generations"], 3);
    assert_eq!(body["confirmation_required"], false);

    let (status, body) = call(&app, Method::GET, "/v1/templates", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 3);
}

/// Test caller-scoped endpoints reject missing credentials
#[tokio::test]
async fn test_missing_bearer_is_unauthorized() {
    let app = app();
    for uri in ["/v1/subscription", "/v1/payments"] {
        let (status, body) = call(&app, Method::GET, uri, None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "unauthorized");
    }
}

/// Test recording a payment, resubmitting it, and reading the entitlement
#[tokio::test]
async fn test_payment_recording_flow() {
    let app = app();
    let claim = json!({"product": "subscription", "plan": "yearly", "amount": 10.0, "signature": "5abcYearly"});

    let (status, body) = call(&app, Method::POST, "/v1/payments", Some("alice"), Some(claim.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["duplicate"], false);
    assert_eq!(body["payment"]["amount_lamports"], 10_000_000_000u64);
    assert_eq!(body["entitlement"]["is_subscribed"], true);
    assert_eq!(body["entitlement"]["plan"], "yearly");

    let (status, body) = call(&app, Method::POST, "/v1/payments", Some("alice"), Some(claim)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["duplicate"], true);
    assert_eq!(body["entitlement"]["total_spent_sol"], 10.0);

    let (status, body) = call(&app, Method::GET, "/v1/payments", Some("alice"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, body) = call(&app, Method::GET, "/v1/subscription", Some("alice"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_subscribed"], true);
    assert_eq!(body["free_generations_remaining"], 3);
}

/// Test a caller's first history read creates the account and returns nothing
#[tokio::test]
async fn test_payment_history_first_contact() {
    let app = app();
    let (status, body) = call(&app, Method::GET, "/v1/payments", Some("newbie"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));

    let (status, body) = call(&app, Method::GET, "/v1/subscription", Some("newbie"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_generated"], 0);
}

/// Test malformed claims are rejected with a validation error
#[tokio::test]
async fn test_invalid_payment_claims() {
    let app = app();
    let cases = [
        json!({"product": "website-generation", "amount": 0.5}),
        json!({"product": "website-generation", "amount": 0.0, "signature": "sig1"}),
        json!({"product": "lottery", "amount": 1.0, "signature": "sig1"}),
        json!({"product": "setup-service", "plan": "monthly", "amount": 2.0, "signature": "sig1"}),
    ];
    for claim in cases {
        let (status, body) = call(&app, Method::POST, "/v1/payments", Some("alice"), Some(claim)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "validation_error");
    }
}

/// Test the same signature cannot be claimed by a second account
#[tokio::test]
async fn test_signature_claimed_once() {
    let app = app();
    let claim = json!({"product": "setup-service", "amount": 2.0, "signature": "setupSig"});
    let (status, _) = call(&app, Method::POST, "/v1/payments", Some("alice"), Some(claim.clone())).await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, body) = call(&app, Method::POST, "/v1/payments", Some("bob"), Some(claim)).await;
    assert_eq!(body["duplicate"], true);

    let (_, body) = call(&app, Method::GET, "/v1/payments", Some("bob"), None).await;
    assert!(body.as_array().unwrap().is_empty());
}

/// Test preview is free and matches what generation returns
#[tokio::test]
async fn test_preview_matches_generate() {
    let app = app();
    let (status, preview) = call(&app, Method::POST, "/v1/sites/preview", None, Some(site_request())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(preview["template"], "neon");

    let (status, generated) = call(&app, Method::POST, "/v1/sites/generate", Some("alice"), Some(site_request())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(generated["digest"], preview["digest"]);
    assert_eq!(generated["html"], preview["html"]);
    assert_eq!(generated["access"], "free");
    assert_eq!(generated["free_generations_remaining"], 2);
}

/// Test the free allowance runs out with a payment-required error
#[tokio::test]
async fn test_generation_free_limit() {
    let app = app();
    for expected in [2, 1, 0] {
        let (status, body) = call(&app, Method::POST, "/v1/sites/generate", Some("alice"), Some(site_request())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["free_generations_remaining"], expected);
    }

    let (status, body) = call(&app, Method::POST, "/v1/sites/generate", Some("alice"), Some(site_request())).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["code"], "free_limit_reached");
    assert_eq!(body["reason"], "free_limit_reached");
}

/// Test invalid content costs nothing
#[tokio::test]
async fn test_invalid_content_not_charged() {
    let app = app();
    let bad = json!({"template": "classic", "content": {"coin_name": "X", "ticker": ""}});
    for _ in 0..5 {
        let (status, body) = call(&app, Method::POST, "/v1/sites/generate", Some("alice"), Some(bad.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "validation_error");
    }
    let (status, body) = call(&app, Method::POST, "/v1/sites/generate", Some("alice"), Some(site_request())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["free_generations_remaining"], 2);

    let unknown = json!({"template": "vaporwave", "content": {"coin_name": "X", "ticker": "X"}});
    let (status, _) = call(&app, Method::POST, "/v1/sites/preview", None, Some(unknown)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

/// Test a generation payment unlocks one render and cannot be replayed by others
#[tokio::test]
async fn test_paid_generation() {
    let app = app();
    let mut request = site_request();
    request["payment"] = json!({"product": "website-generation", "amount": 0.5, "signature": "genPay1"});

    let (status, body) = call(&app, Method::POST, "/v1/sites/generate", Some("alice"), Some(request.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["access"], "paid");
    assert_eq!(body["payment"]["signature"], "genPay1");
    let digest = body["site"]["digest"].clone();

    // payer retry of the same site
    let (status, body) = call(&app, Method::POST, "/v1/sites/generate", Some("alice"), Some(request.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["access"], "paid");
    assert_eq!(body["site"]["digest"], digest);

    let (status, body) = call(&app, Method::POST, "/v1/sites/generate", Some("bob"), Some(request)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "payment_already_used");

    let (_, body) = call(&app, Method::GET, "/v1/subscription", Some("alice"), None).await;
    assert_eq!(body["total_generated"], 1);

    let mut wrong = site_request();
    wrong["payment"] = json!({"product": "setup-service", "amount": 2.0, "signature": "setupPay"});
    let (status, _) = call(&app, Method::POST, "/v1/sites/generate", Some("alice"), Some(wrong)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

/// Test one payment never renders a second, different site
#[tokio::test]
async fn test_paid_generation_replay_with_new_content() {
    let app = app();
    let payment = json!({"product": "website-generation", "amount": 0.5, "signature": "genPay1"});
    let mut request = site_request();
    request["payment"] = payment.clone();
    let (status, _) = call(&app, Method::POST, "/v1/sites/generate", Some("alice"), Some(request)).await;
    assert_eq!(status, StatusCode::OK);

    for name in ["Sun Dog", "Mars Frog", "Moon Cat II"] {
        let mut replay = site_request();
        replay["content"]["coin_name"] = json!(name);
        replay["payment"] = payment.clone();
        let (status, body) = call(&app, Method::POST, "/v1/sites/generate", Some("alice"), Some(replay)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "payment_already_used");
    }

    let (_, body) = call(&app, Method::GET, "/v1/subscription", Some("alice"), None).await;
    assert_eq!(body["total_generated"], 1);
    assert_eq!(body["free_generations_remaining"], 2);
}

/// Test a generation payment recorded up front is spent by the first render
#[tokio::test]
async fn test_prerecorded_generation_payment() {
    let app = app();
    let payment = json!({"product": "website-generation", "amount": 0.5, "signature": "earlyPay"});
    let (status, _) = call(&app, Method::POST, "/v1/payments", Some("dave"), Some(payment.clone())).await;
    assert_eq!(status, StatusCode::CREATED);

    let mut request = site_request();
    request["payment"] = payment.clone();
    let (status, body) = call(&app, Method::POST, "/v1/sites/generate", Some("dave"), Some(request)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["access"], "paid");

    let mut other = site_request();
    other["content"]["ticker"] = json!("DOGE2");
    other["payment"] = payment;
    let (status, _) = call(&app, Method::POST, "/v1/sites/generate", Some("dave"), Some(other)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

/// Test subscribers generate without touching the free allowance
#[tokio::test]
async fn test_subscriber_generation() {
    let app = app();
    let claim = json!({"product": "subscription", "amount": 1.0, "signature": "monthSub"});
    call(&app, Method::POST, "/v1/payments", Some("carol"), Some(claim)).await;

    for _ in 0..5 {
        let (status, body) = call(&app, Method::POST, "/v1/sites/generate", Some("carol"), Some(site_request())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["access"], "subscription");
        assert_eq!(body["free_generations_remaining"], Value::Null);
    }
}

/// Test wallet attachment and conflicts
#[tokio::test]
async fn test_wallet_attachment() {
    let app = app();
    let request = Request::builder()
        .method(Method::GET)
        .uri("/v1/subscription")
        .header(header::AUTHORIZATION, "Bearer alice")
        .header(WALLET_HEADER, "AliceWallet111")
        .body(Body::empty())
        .unwrap();
    assert_eq!(app.clone().oneshot(request).await.unwrap().status(), StatusCode::OK);

    let (status, body) = call(
        &app,
        Method::POST,
        "/v1/account/wallet",
        Some("bob"),
        Some(json!({"wallet_address": "AliceWallet111"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "wallet_taken");

    let (status, body) = call(
        &app,
        Method::POST,
        "/v1/account/wallet",
        Some("bob"),
        Some(json!({"wallet_address": "BobWallet222"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["wallet_address"], "BobWallet222");
}

/// Test rate limiting returns 429 with a retry hint
#[tokio::test]
async fn test_rate_limit() {
    let state = AppState::new(ledger()).with_rate_limit(RateLimitConfig {
        enabled: true,
        window_secs: 60,
        max_requests: 2,
    });
    let app = create_router(Arc::new(state));

    for _ in 0..2 {
        let (status, _) = call(&app, Method::GET, "/v1/health", Some("alice"), None).await;
        assert_eq!(status, StatusCode::OK);
    }
    let request = Request::builder()
        .uri("/v1/health")
        .header(header::AUTHORIZATION, "Bearer alice")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));

    // other callers have their own window
    let (status, _) = call(&app, Method::GET, "/v1/health", Some("bob"), None).await;
    assert_eq!(status, StatusCode::OK);
}

/// Test a router built without a rate limit config never throttles
#[tokio::test]
async fn test_rate_limit_off_by_default() {
    let app = app();
    for _ in 0..150 {
        let (status, _) = call(&app, Method::GET, "/v1/health", Some("alice"), None).await;
        assert_eq!(status, StatusCode::OK);
    }
}

/// Status source that lands every signature once released
struct GatedSource {
    landed: AtomicBool,
}

#[async_trait]
impl SignatureStatusSource for GatedSource {
    async fn signature_status(&self, _signature: &str) -> Result<SignatureStatus, ConfirmationError> {
        if self.landed.load(Ordering::SeqCst) {
            Ok(SignatureStatus::Landed(CommitmentLevel::Finalized))
        } else {
            Ok(SignatureStatus::Unknown)
        }
    }
}

/// Test unconfirmed payments fail closed and can be resubmitted later
#[tokio::test]
async fn test_confirmation_timeout_fails_closed() {
    let source = Arc::new(GatedSource {
        landed: AtomicBool::new(false),
    });
    let watcher = ConfirmationWatcher::new(
        source.clone(),
        WatcherSettings {
            commitment: CommitmentLevel::Confirmed,
            poll_interval: Duration::from_millis(5),
            timeout: Duration::from_millis(40),
        },
    );
    let app = create_router(Arc::new(AppState::new(ledger()).with_watcher(watcher)));
    let claim = json!({"product": "subscription", "amount": 1.0, "signature": "slowSig"});

    let (status, body) = call(&app, Method::POST, "/v1/payments", Some("alice"), Some(claim.clone())).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["code"], "confirmation_timeout");

    let (_, body) = call(&app, Method::GET, "/v1/subscription", Some("alice"), None).await;
    assert_eq!(body["is_subscribed"], false);

    source.landed.store(true, Ordering::SeqCst);
    let (status, body) = call(&app, Method::POST, "/v1/payments", Some("alice"), Some(claim)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["entitlement"]["is_subscribed"], true);
}

#[derive(Default)]
struct CountingSender {
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl GroupSender for CountingSender {
    async fn send(&self, group_id: &str, _text: &str) -> Result<(), TelegramError> {
        self.sent.lock().unwrap().push(group_id.to_string());
        Ok(())
    }
}

/// Test broadcast reports partial delivery, then refuses once the allowance is gone
#[tokio::test]
async fn test_broadcast_endpoint() {
    let unconfigured = app();
    let request = json!({"groups": ["@g1"], "message": "gm"});
    let (status, body) = call(&unconfigured, Method::POST, "/v1/telegram/broadcast", Some("alice"), Some(request)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "telegram_unavailable");

    let sender = Arc::new(CountingSender::default());
    let state = AppState::new(ledger()).with_broadcaster(
        sender.clone(),
        BroadcastSettings {
            message_delay: Duration::ZERO,
            max_groups: 10,
        },
    );
    let app = create_router(Arc::new(state));

    let request = json!({"groups": ["@g1", "@g2", "@g3", "@g4"], "message": "launching now"});
    let (status, body) = call(&app, Method::POST, "/v1/telegram/broadcast", Some("alice"), Some(request.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deliveries"].as_array().unwrap().len(), 3);
    assert_eq!(body["deliveries"][0]["status"], "sent");
    assert_eq!(body["skipped"], json!(["@g4"]));
    assert_eq!(body["denied"], "free_limit_reached");

    let (status, body) = call(&app, Method::POST, "/v1/telegram/broadcast", Some("alice"), Some(request)).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["code"], "free_limit_reached");
    assert_eq!(sender.sent.lock().unwrap().len(), 3);
}
