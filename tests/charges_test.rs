//! End-to-end charge creation against a memory store and a mocked gateway.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use serde_json::{json, Value};
use tower::ServiceExt;

use botpay_core::brcode;
use botpay_core::config::FallbackCredentials;
use botpay_core::db::models::{GatewayConfig, PaymentPlan};
use botpay_core::db::{MemoryStore, Store};
use botpay_core::domain::Environment;
use botpay_core::services::GatewayEndpoints;
use botpay_core::{create_app, AppState};

// BR Code with a valid trailer; tests corrupt it to exercise correction.
const GOOD_CODE: &str = "00020126580014BR.GOV.BCB.PIX0136123e4567-e12b-12d1-a456-4266554400005204000053039865802BR5913Fulano de Tal6008BRASILIA62070503***6304F01B";

fn test_state(store: &MemoryStore, gateway_url: &str) -> AppState {
    test_state_with_fallback(store, gateway_url, FallbackCredentials::default())
}

fn test_state_with_fallback(
    store: &MemoryStore,
    gateway_url: &str,
    fallback: FallbackCredentials,
) -> AppState {
    let store: Arc<dyn Store> = Arc::new(store.clone());
    AppState::new(
        store,
        Environment::Sandbox,
        fallback,
        GatewayEndpoints {
            mercadopago: gateway_url.to_string(),
            stripe: gateway_url.to_string(),
        },
        None,
    )
}

async fn seed_plan(store: &MemoryStore) {
    let now = Utc::now();
    store
        .add_plan(PaymentPlan {
            id: 1,
            bot_id: 10,
            title: "Plano Mensal".to_string(),
            price: "29.90".parse().unwrap(),
            active: true,
            created_at: now,
            updated_at: now,
        })
        .await;
}

async fn seed_mercadopago_config(store: &MemoryStore) {
    let now = Utc::now();
    store
        .add_gateway_config(GatewayConfig {
            id: 1,
            bot_id: 10,
            gateway: "mercadopago".to_string(),
            environment: "sandbox".to_string(),
            access_token: Some("TEST-mp-token".to_string()),
            public_key: None,
            webhook_secret: None,
            webhook_url: None,
            active: true,
            created_at: now,
            updated_at: now,
        })
        .await;
}

async fn seed_stripe_config(store: &MemoryStore) {
    let now = Utc::now();
    store
        .add_gateway_config(GatewayConfig {
            id: 2,
            bot_id: 10,
            gateway: "stripe".to_string(),
            environment: "sandbox".to_string(),
            access_token: Some("sk_test_xxx".to_string()),
            public_key: Some("pk_test_xxx".to_string()),
            webhook_secret: Some("whsec_test".to_string()),
            webhook_url: None,
            active: true,
            created_at: now,
            updated_at: now,
        })
        .await;
}

fn pix_charge_body() -> Value {
    json!({
        "payment_plan_id": 1,
        "bot_id": 10,
        "payer": { "email": "payer@example.com", "first_name": "Maria" }
    })
}

async fn post_json(app: axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn pix_charge_corrects_crc_and_lands_in_processing() {
    let mut server = mockito::Server::new_async().await;

    // The gateway hands back a payload with a corrupted CRC trailer.
    let stale_code = format!("{}0000", &GOOD_CODE[..GOOD_CODE.len() - 4]);
    let _create = server
        .mock("POST", "/v1/payments")
        .with_status(201)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "id": 555,
                "status": "pending",
                "status_detail": "pending_waiting_transfer",
                "external_reference": "1",
                "date_of_expiration": "2026-09-01T12:00:00.000Z",
                "point_of_interaction": {
                    "transaction_data": {
                        "qr_code": stale_code,
                        "qr_code_base64": "aGVsbG8=",
                        "ticket_url": "https://mp.example/ticket/555"
                    }
                }
            })
            .to_string(),
        )
        .create_async()
        .await;

    let store = MemoryStore::new();
    seed_plan(&store).await;
    seed_mercadopago_config(&store).await;
    let state = test_state(&store, &server.url());

    let (status, body) = post_json(create_app(state.clone()), "/charges/pix", pix_charge_body()).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["transaction"]["status"], "processing");
    assert_eq!(body["transaction"]["gateway_status"], "pending");
    assert_eq!(body["transaction"]["gateway_payment_id"], "555");

    // The corrected payload must check out even though the gateway's didn't.
    let qr_code = body["pix"]["qr_code"].as_str().unwrap();
    let report = brcode::validate(qr_code);
    assert!(report.format_valid);
    assert!(report.crc_valid);
    assert_eq!(qr_code, GOOD_CODE);

    // Correction statistics recorded the fix under sandbox.
    let snapshot = state.stats.snapshot();
    assert_eq!(snapshot.sandbox.checked, 1);
    assert_eq!(snapshot.sandbox.corrected, 1);

    // Stored row matches what the caller saw.
    let stored = store.transaction(1).await.unwrap().unwrap();
    assert_eq!(stored.qr_code.as_deref(), Some(GOOD_CODE));
    assert_eq!(stored.qr_code_base64.as_deref(), Some("aGVsbG8="));
    assert_eq!(stored.status, "processing");
}

#[tokio::test]
async fn undecodable_qr_image_is_dropped_but_the_charge_succeeds() {
    let mut server = mockito::Server::new_async().await;
    let _create = server
        .mock("POST", "/v1/payments")
        .with_status(201)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "id": 557,
                "status": "pending",
                "point_of_interaction": {
                    "transaction_data": {
                        "qr_code": GOOD_CODE,
                        "qr_code_base64": "not base64!!!"
                    }
                }
            })
            .to_string(),
        )
        .create_async()
        .await;

    let store = MemoryStore::new();
    seed_plan(&store).await;
    seed_mercadopago_config(&store).await;
    let state = test_state(&store, &server.url());

    let (status, body) = post_json(create_app(state), "/charges/pix", pix_charge_body()).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["pix"]["qr_code_base64"], Value::Null);
    // The text payload still carries the charge.
    assert_eq!(body["pix"]["qr_code"], GOOD_CODE);

    let stored = store.transaction(1).await.unwrap().unwrap();
    assert_eq!(stored.qr_code_base64, None);
    assert_eq!(stored.qr_code.as_deref(), Some(GOOD_CODE));
}

#[tokio::test]
async fn pix_charge_without_config_fails_before_any_row_is_written() {
    let server = mockito::Server::new_async().await;

    let store = MemoryStore::new();
    seed_plan(&store).await;
    // No gateway config and an empty fallback.
    let state = test_state(&store, &server.url());

    let (status, body) = post_json(create_app(state), "/charges/pix", pix_charge_body()).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("not configured"));

    // The failure happened before the transaction insert.
    let transactions = store.list_transactions(50, 0).await.unwrap();
    assert!(transactions.is_empty());
}

#[tokio::test]
async fn pix_charge_uses_env_fallback_when_no_tenant_config_exists() {
    let mut server = mockito::Server::new_async().await;
    let _create = server
        .mock("POST", "/v1/payments")
        .match_header("authorization", "Bearer FALLBACK-token")
        .with_status(201)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "id": 556,
                "status": "pending",
                "point_of_interaction": {
                    "transaction_data": { "qr_code": GOOD_CODE }
                }
            })
            .to_string(),
        )
        .create_async()
        .await;

    let store = MemoryStore::new();
    seed_plan(&store).await;
    let state = test_state_with_fallback(
        &store,
        &server.url(),
        FallbackCredentials {
            mercadopago_access_token: Some("FALLBACK-token".to_string()),
            ..Default::default()
        },
    );

    let (status, body) = post_json(create_app(state), "/charges/pix", pix_charge_body()).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["transaction"]["status"], "processing");
}

#[tokio::test]
async fn pix_charge_for_unknown_plan_is_404() {
    let server = mockito::Server::new_async().await;
    let store = MemoryStore::new();
    seed_mercadopago_config(&store).await;
    let state = test_state(&store, &server.url());

    let (status, _) = post_json(
        create_app(state),
        "/charges/pix",
        json!({
            "payment_plan_id": 99,
            "bot_id": 10,
            "payer": { "email": "payer@example.com" }
        }),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(store.list_transactions(50, 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn gateway_failure_leaves_a_rejected_row_with_the_error_on_record() {
    let mut server = mockito::Server::new_async().await;
    let _create = server
        .mock("POST", "/v1/payments")
        .with_status(500)
        .with_body(r#"{"message":"internal error"}"#)
        .create_async()
        .await;

    let store = MemoryStore::new();
    seed_plan(&store).await;
    seed_mercadopago_config(&store).await;
    let state = test_state(&store, &server.url());

    let (status, body) = post_json(create_app(state), "/charges/pix", pix_charge_body()).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["transaction_id"], 1);

    // The row is never deleted and never left pending.
    let stored = store.transaction(1).await.unwrap().unwrap();
    assert_eq!(stored.status, "rejected");
    let entries = stored.audit_entries();
    assert!(entries
        .iter()
        .any(|e| e.source == "charge.error" && e.data["error"].as_str().is_some()));
}

#[tokio::test]
async fn card_charge_tokenizes_then_charges() {
    let mut server = mockito::Server::new_async().await;
    let tokenize = server
        .mock("POST", "/v1/payment_methods")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id":"pm_123"}"#)
        .expect(1)
        .create_async()
        .await;
    let _intent = server
        .mock("POST", "/v1/payment_intents")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "id": "pi_900",
                "status": "succeeded",
                "client_secret": "pi_900_secret",
                "metadata": { "external_reference": "1" }
            })
            .to_string(),
        )
        .create_async()
        .await;

    let store = MemoryStore::new();
    seed_plan(&store).await;
    seed_stripe_config(&store).await;
    let state = test_state(&store, &server.url());

    let (status, body) = post_json(
        create_app(state),
        "/charges/card",
        json!({
            "payment_plan_id": 1,
            "bot_id": 10,
            "card": {
                "number": "4242424242424242",
                "exp_month": 12,
                "exp_year": 2030,
                "cvc": "123"
            }
        }),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["client_secret"], "pi_900_secret");
    assert_eq!(body["transaction"]["status"], "approved");
    tokenize.assert_async().await;
}

#[tokio::test]
async fn card_charge_requires_exactly_one_payment_source() {
    let server = mockito::Server::new_async().await;
    let store = MemoryStore::new();
    seed_plan(&store).await;
    seed_stripe_config(&store).await;
    let state = test_state(&store, &server.url());

    let (status, _) = post_json(
        create_app(state),
        "/charges/card",
        json!({ "payment_plan_id": 1, "bot_id": 10 }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(store.list_transactions(50, 0).await.unwrap().is_empty());
}
