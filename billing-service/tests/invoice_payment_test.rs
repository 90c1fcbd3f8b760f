//! Payment and status patch integration tests for billing-service.

mod common;

use common::{money, TestApp};
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;

async fn create_invoice(client: &Client, app: &TestApp, business_id: Uuid, shop_id: Uuid) -> serde_json::Value {
    let response = client
        .post(app.url("/api/invoices"))
        .json(&json!({
            "business_id": business_id,
            "shop_id": shop_id,
            "items": [
                {"description": "Steel bolts", "quantity": 2, "unit_price": 100, "discount": 10, "tax_rate": 18}
            ]
        }))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status(), 201);
    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    body["data"].clone()
}

async fn patch_invoice(
    client: &Client,
    app: &TestApp,
    invoice_id: &str,
    patch: serde_json::Value,
) -> reqwest::Response {
    client
        .patch(app.url(&format!("/api/invoices/{}", invoice_id)))
        .json(&patch)
        .send()
        .await
        .expect("Failed to execute request")
}

#[tokio::test]
async fn patch_to_paid_without_amount_auto_settles() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };
    let (business_id, shop_id) = app.seed_business("INV-", 1, 5).await;
    let client = Client::new();

    let invoice = create_invoice(&client, &app, business_id, shop_id).await;
    let invoice_id = invoice["id"].as_str().unwrap();

    let response = patch_invoice(&client, &app, invoice_id, json!({"status": "PAID"})).await;
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["data"]["status"], "PAID");
    assert_eq!(
        money(&body["data"]["amount_paid"]),
        "224.20".parse::<Decimal>().unwrap()
    );

    app.cleanup().await;
}

#[tokio::test]
async fn patch_stores_overpayment_as_given() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };
    let (business_id, shop_id) = app.seed_business("INV-", 1, 5).await;
    let client = Client::new();

    let invoice = create_invoice(&client, &app, business_id, shop_id).await;
    let invoice_id = invoice["id"].as_str().unwrap();

    // amount_paid is not clamped to the grand total
    let response = patch_invoice(
        &client,
        &app,
        invoice_id,
        json!({"status": "PAID", "amount_paid": 500}),
    )
    .await;
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(
        money(&body["data"]["amount_paid"]),
        "500.00".parse::<Decimal>().unwrap()
    );

    app.cleanup().await;
}

#[tokio::test]
async fn patch_amount_only_keeps_status() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };
    let (business_id, shop_id) = app.seed_business("INV-", 1, 5).await;
    let client = Client::new();

    let invoice = create_invoice(&client, &app, business_id, shop_id).await;
    let invoice_id = invoice["id"].as_str().unwrap();

    let response = patch_invoice(&client, &app, invoice_id, json!({"amount_paid": 100})).await;
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["data"]["status"], "ISSUED");
    assert_eq!(
        money(&body["data"]["amount_paid"]),
        "100.00".parse::<Decimal>().unwrap()
    );

    app.cleanup().await;
}

#[tokio::test]
async fn noop_patch_returns_current_row_without_write() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };
    let (business_id, shop_id) = app.seed_business("INV-", 1, 5).await;
    let client = Client::new();

    let invoice = create_invoice(&client, &app, business_id, shop_id).await;
    let invoice_id = invoice["id"].as_str().unwrap();
    let updated_at = invoice["updated_at"].as_str().unwrap();

    // An empty patch resolves to the current values
    let response = patch_invoice(&client, &app, invoice_id, json!({})).await;
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["data"]["updated_at"].as_str().unwrap(), updated_at);

    // So does re-sending the current status
    let response = patch_invoice(&client, &app, invoice_id, json!({"status": "ISSUED"})).await;
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["data"]["updated_at"].as_str().unwrap(), updated_at);

    app.cleanup().await;
}

#[tokio::test]
async fn repeated_paid_patch_is_a_noop() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };
    let (business_id, shop_id) = app.seed_business("INV-", 1, 5).await;
    let client = Client::new();

    let invoice = create_invoice(&client, &app, business_id, shop_id).await;
    let invoice_id = invoice["id"].as_str().unwrap();

    let response = patch_invoice(&client, &app, invoice_id, json!({"status": "PAID"})).await;
    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    let settled_at = body["data"]["updated_at"].as_str().unwrap().to_string();

    // Second PAID patch auto-settles to the same amount and changes nothing
    let response = patch_invoice(&client, &app, invoice_id, json!({"status": "PAID"})).await;
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["data"]["updated_at"].as_str().unwrap(), settled_at);

    app.cleanup().await;
}

#[tokio::test]
async fn patch_rejects_negative_amount() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };
    let (business_id, shop_id) = app.seed_business("INV-", 1, 5).await;
    let client = Client::new();

    let invoice = create_invoice(&client, &app, business_id, shop_id).await;
    let invoice_id = invoice["id"].as_str().unwrap();

    let response = patch_invoice(&client, &app, invoice_id, json!({"amount_paid": -5})).await;
    assert_eq!(response.status(), 400);

    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert!(body["error"].as_str().unwrap().contains("negative"));

    app.cleanup().await;
}

#[tokio::test]
async fn patch_unknown_invoice_returns_404() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };
    let client = Client::new();

    let response = patch_invoice(
        &client,
        &app,
        &Uuid::new_v4().to_string(),
        json!({"status": "PAID"}),
    )
    .await;
    assert_eq!(response.status(), 404);

    app.cleanup().await;
}

#[tokio::test]
async fn permissive_mode_allows_any_transition() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };
    let (business_id, shop_id) = app.seed_business("INV-", 1, 5).await;
    let client = Client::new();

    let invoice = create_invoice(&client, &app, business_id, shop_id).await;
    let invoice_id = invoice["id"].as_str().unwrap();

    let response = patch_invoice(&client, &app, invoice_id, json!({"status": "VOID"})).await;
    assert_eq!(response.status(), 200);

    // Default behavior accepts reopening a voided invoice
    let response = patch_invoice(&client, &app, invoice_id, json!({"status": "ISSUED"})).await;
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["data"]["status"], "ISSUED");

    app.cleanup().await;
}

#[tokio::test]
async fn strict_mode_enforces_terminal_void() {
    let Some(app) = TestApp::spawn_strict().await else {
        return;
    };
    let (business_id, shop_id) = app.seed_business("INV-", 1, 5).await;
    let client = Client::new();

    let invoice = create_invoice(&client, &app, business_id, shop_id).await;
    let invoice_id = invoice["id"].as_str().unwrap();

    let response = patch_invoice(&client, &app, invoice_id, json!({"status": "VOID"})).await;
    assert_eq!(response.status(), 200);

    let response = patch_invoice(&client, &app, invoice_id, json!({"status": "PAID"})).await;
    assert_eq!(response.status(), 409);
    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert!(body["error"].as_str().unwrap().contains("not allowed"));

    app.cleanup().await;
}

#[tokio::test]
async fn strict_mode_limits_paid_exits() {
    let Some(app) = TestApp::spawn_strict().await else {
        return;
    };
    let (business_id, shop_id) = app.seed_business("INV-", 1, 5).await;
    let client = Client::new();

    let invoice = create_invoice(&client, &app, business_id, shop_id).await;
    let invoice_id = invoice["id"].as_str().unwrap();

    let response = patch_invoice(&client, &app, invoice_id, json!({"status": "PAID"})).await;
    assert_eq!(response.status(), 200);

    // PAID may only move to VOID or PARTIALLY_PAID
    let response = patch_invoice(&client, &app, invoice_id, json!({"status": "DRAFT"})).await;
    assert_eq!(response.status(), 409);

    let response = patch_invoice(
        &client,
        &app,
        invoice_id,
        json!({"status": "PARTIALLY_PAID", "amount_paid": 100}),
    )
    .await;
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["data"]["status"], "PARTIALLY_PAID");

    app.cleanup().await;
}
