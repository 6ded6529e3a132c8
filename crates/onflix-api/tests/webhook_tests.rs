//! Payment provider webhook integration tests.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use serde_json::{json, Value};

use common::{event, read_json, FlakyStore, TestApp, WEBHOOK_SECRET};
use onflix_store::{collections, Filter};
use onflix_billing::{sign_payload, SIGNATURE_TOLERANCE_SECS};

/// A subscribed user: `(token, local subscription JSON, movie id)`.
async fn subscribed(app: &TestApp, email: &str) -> (String, Value, String) {
    let plans = app.seed_plans().await;
    let movie = app.seed_movie("Signal Lost").await;
    let (_, token) = app.register(email).await;
    let sub = app.subscribe(&token, &plans.standard.id).await;
    (token, sub, movie.id)
}

fn provider_id(sub: &Value) -> String {
    sub["stripe_subscription_id"].as_str().unwrap().to_string()
}

fn failed_invoice(sub: &Value, invoice_id: &str) -> Value {
    json!({
        "id": invoice_id,
        "customer": sub["stripe_customer_id"],
        "subscription": provider_id(sub),
        "amount_due": 1399,
        "currency": "usd",
        "status": "open",
    })
}

async fn wait_for_email(app: &TestApp, subject: &str) -> bool {
    for _ in 0..50 {
        if app
            .notifier
            .sent
            .lock()
            .unwrap()
            .iter()
            .any(|e| e.subject == subject)
        {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_payment_failure_revokes_streaming() {
    let app = TestApp::new().await;
    let (token, sub, movie_id) = subscribed(&app, "late@example.com").await;
    let stream = format!("/api/v1/content/{}/stream", movie_id);

    let (status, _) = app.get(&stream, Some(&token)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .webhook(&event(
            "evt_fail_1",
            "invoice.payment_failed",
            failed_invoice(&sub, "in_fail_1"),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], true);
    assert_eq!(body["outcome"], "processed");

    let (_, current) = app.get("/api/v1/subscriptions/current", Some(&token)).await;
    assert_eq!(current["subscription"]["status"], "past_due");

    let (status, body) = app.get(&stream, Some(&token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "not_entitled");

    assert!(wait_for_email(&app, "Payment failed").await);
}

#[tokio::test]
async fn test_redelivered_event_is_applied_once() {
    let app = TestApp::new().await;
    let (_, sub, _) = subscribed(&app, "twice@example.com").await;
    let evt = event(
        "evt_dup_1",
        "invoice.payment_failed",
        failed_invoice(&sub, "in_dup_1"),
    );

    let (status, body) = app.webhook(&evt).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "processed");

    let (status, body) = app.webhook(&evt).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "duplicate");

    let failed = app
        .state
        .repos
        .payments
        .count(&Filter::eq("stripe_invoice_id", "in_dup_1"))
        .await
        .unwrap();
    assert_eq!(failed, 1);
}

#[tokio::test]
async fn test_retried_charge_settles_the_failed_payment() {
    let app = TestApp::new().await;
    let (token, sub, _) = subscribed(&app, "retry@example.com").await;

    let mut failed = failed_invoice(&sub, "in_retry_1");
    failed["payment_intent"] = json!("pi_retry_1");
    let (status, _) = app
        .webhook(&event("evt_retry_fail", "invoice.payment_failed", failed))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .webhook(&event(
            "evt_retry_paid",
            "invoice.payment_succeeded",
            json!({
                "id": "in_retry_1",
                "customer": sub["stripe_customer_id"],
                "subscription": provider_id(&sub),
                "payment_intent": "pi_retry_1",
                "charge": "ch_retry_1",
                "amount_due": 1399,
                "amount_paid": 1399,
                "total": 1399,
                "currency": "usd",
                "status": "paid",
            }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "processed");

    let payments = app
        .state
        .repos
        .payments
        .find(
            &Filter::eq("stripe_payment_intent_id", "pi_retry_1"),
            &Default::default(),
        )
        .await
        .unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status.as_str(), "succeeded");
    assert!(payments[0].failure_reason.is_none());
    assert_eq!(payments[0].stripe_charge_id.as_deref(), Some("ch_retry_1"));

    let (_, invoices) = app.get("/api/v1/subscriptions/invoices", Some(&token)).await;
    assert_eq!(invoices["pagination"]["total_items"], 1);
    assert_eq!(invoices["items"][0]["status"], "paid");
}

#[tokio::test]
async fn test_failed_handler_releases_the_event_for_redelivery() {
    let store = Arc::new(FlakyStore::default());
    let app = TestApp::with_store(common::test_config(), store.clone()).await;
    let (token, sub, _) = subscribed(&app, "outage@example.com").await;
    let evt = event(
        "evt_outage_1",
        "invoice.payment_failed",
        failed_invoice(&sub, "in_outage_1"),
    );

    store.fail_writes_to(collections::SUBSCRIPTIONS);
    let (status, _) = app.webhook(&evt).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let claimed = app
        .state
        .repos
        .store
        .count(collections::WEBHOOK_EVENTS, &Filter::eq("id", "evt_outage_1"))
        .await
        .unwrap();
    assert_eq!(claimed, 0);

    store.recover();
    let (status, body) = app.webhook(&evt).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "processed");

    let (_, current) = app.get("/api/v1/subscriptions/current", Some(&token)).await;
    assert_eq!(current["subscription"]["status"], "past_due");
    let payments = app
        .state
        .repos
        .payments
        .count(&Filter::eq("stripe_invoice_id", "in_outage_1"))
        .await
        .unwrap();
    assert_eq!(payments, 1);
}

#[tokio::test]
async fn test_subscription_updated_restores_access() {
    let app = TestApp::new().await;
    let (token, sub, movie_id) = subscribed(&app, "recovered@example.com").await;
    let stream = format!("/api/v1/content/{}/stream", movie_id);

    app.webhook(&event(
        "evt_fail_2",
        "invoice.payment_failed",
        failed_invoice(&sub, "in_fail_2"),
    ))
    .await;
    let (status, _) = app.get(&stream, Some(&token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Paying the invoice alone does not change status
    let (status, body) = app
        .webhook(&event(
            "evt_paid_2",
            "invoice.payment_succeeded",
            json!({
                "id": "in_fail_2",
                "customer": sub["stripe_customer_id"],
                "subscription": provider_id(&sub),
                "amount_due": 1399,
                "amount_paid": 1399,
                "total": 1399,
                "currency": "usd",
                "status": "paid",
            }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "processed");
    let (_, invoices) = app.get("/api/v1/subscriptions/invoices", Some(&token)).await;
    assert_eq!(invoices["pagination"]["total_items"], 1);
    assert_eq!(invoices["items"][0]["status"], "paid");

    let mut provider = serde_json::to_value(app.billing.subscription(&provider_id(&sub)).unwrap())
        .unwrap();
    provider["status"] = json!("active");
    let (status, body) = app
        .webhook(&event(
            "evt_updated_2",
            "customer.subscription.updated",
            provider,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "processed");

    let (status, _) = app.get(&stream, Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_subscription_deleted_is_terminal() {
    let app = TestApp::new().await;
    let (token, sub, movie_id) = subscribed(&app, "ended@example.com").await;

    let provider = serde_json::to_value(app.billing.subscription(&provider_id(&sub)).unwrap())
        .unwrap();
    let mut deleted = provider.clone();
    deleted["status"] = json!("canceled");
    let (status, _) = app
        .webhook(&event(
            "evt_deleted_3",
            "customer.subscription.deleted",
            deleted,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, current) = app.get("/api/v1/subscriptions/current", Some(&token)).await;
    assert_eq!(current["subscription"]["status"], "cancelled");

    // A late update cannot revive it
    let mut late = provider;
    late["status"] = json!("active");
    let (status, _) = app
        .webhook(&event("evt_late_3", "customer.subscription.updated", late))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, current) = app.get("/api/v1/subscriptions/current", Some(&token)).await;
    assert_eq!(current["subscription"]["status"], "cancelled");

    let (status, _) = app
        .get(&format!("/api/v1/content/{}/stream", movie_id), Some(&token))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_unknown_and_unhandled_events_are_acknowledged() {
    let app = TestApp::new().await;

    let (status, body) = app
        .webhook(&event(
            "evt_unknown_4",
            "invoice.payment_failed",
            json!({
                "id": "in_unknown",
                "customer": "cus_nobody",
                "subscription": "sub_nobody",
                "amount_due": 500,
                "currency": "usd",
            }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "unknown_record");

    let (status, body) = app
        .webhook(&event(
            "evt_other_4",
            "customer.created",
            json!({"id": "cus_new"}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "ignored");
}

#[tokio::test]
async fn test_rejects_bad_signatures() {
    let app = TestApp::new().await;
    let payload = event("evt_sig_5", "customer.created", json!({"id": "cus_1"})).to_string();

    let post = |signature: Option<String>, body: String| {
        let mut builder = Request::builder().method("POST").uri("/api/v1/webhooks/stripe");
        if let Some(signature) = signature {
            builder = builder.header("stripe-signature", signature);
        }
        builder.body(Body::from(body)).unwrap()
    };

    let response = app.send(post(None, payload.clone())).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Only served under the API prefix
    let response = app
        .send(
            Request::builder()
                .method("POST")
                .uri("/webhooks/stripe")
                .body(Body::from(payload.clone()))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let wrong = sign_payload(payload.as_bytes(), "whsec_wrong", Utc::now().timestamp()).unwrap();
    let response = app.send(post(Some(wrong), payload.clone())).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let stale = sign_payload(
        payload.as_bytes(),
        WEBHOOK_SECRET,
        Utc::now().timestamp() - SIGNATURE_TOLERANCE_SECS - 60,
    )
    .unwrap();
    let response = app.send(post(Some(stale), payload.clone())).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Signed over a different body
    let signature =
        sign_payload(payload.as_bytes(), WEBHOOK_SECRET, Utc::now().timestamp()).unwrap();
    let response = app
        .send(post(Some(signature), payload.replace("cus_1", "cus_2")))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Authentic but not an event
    let junk = b"{\"hello\":\"world\"}".to_vec();
    let signature = sign_payload(&junk, WEBHOOK_SECRET, Utc::now().timestamp()).unwrap();
    let response = app
        .send(post(Some(signature), String::from_utf8(junk).unwrap()))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = read_json(response).await;
    assert_eq!(body["detail"], "Bad request: Invalid webhook payload");
}

#[tokio::test]
async fn test_webhook_disabled_without_secret() {
    let config = onflix_api::ApiConfig {
        stripe_webhook_secret: String::new(),
        ..common::test_config()
    };
    let app = TestApp::with_config(config).await;

    let (status, _) = app
        .webhook(&event("evt_cfg_6", "customer.created", json!({"id": "cus_1"})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
