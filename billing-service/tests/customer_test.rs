//! Customer management integration tests for billing-service.

mod common;

use common::TestApp;
use reqwest::Client;
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn customer_crud_roundtrip() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };
    let (business_id, _shop_id) = app.seed_business("INV-", 1, 5).await;
    let client = Client::new();

    let response = client
        .post(app.url("/api/customers"))
        .json(&json!({
            "business_id": business_id,
            "name": "Asha Traders",
            "email": "asha@example.com",
            "phone": "+91-9876500000",
            "gst_number": "29ABCDE1234F1Z5"
        }))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status(), 201);
    let created: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(created["data"]["name"], "Asha Traders");
    assert_eq!(created["data"]["country"], "IN");
    let customer_id = created["data"]["id"].as_str().unwrap().to_string();

    let response = client
        .get(app.url(&format!("/api/customers/{}", customer_id)))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["data"]["email"], "asha@example.com");

    // Partial update touches only the provided fields
    let response = client
        .put(app.url(&format!("/api/customers/{}", customer_id)))
        .json(&json!({"phone": "+91-9876511111"}))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["data"]["phone"], "+91-9876511111");
    assert_eq!(body["data"]["name"], "Asha Traders");
    assert_eq!(body["data"]["email"], "asha@example.com");

    let response = client
        .delete(app.url(&format!("/api/customers/{}", customer_id)))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["success"], true);

    let response = client
        .get(app.url(&format!("/api/customers/{}", customer_id)))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status(), 404);

    app.cleanup().await;
}

#[tokio::test]
async fn create_customer_validates_input() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };
    let (business_id, _shop_id) = app.seed_business("INV-", 1, 5).await;
    let client = Client::new();

    let response = client
        .post(app.url("/api/customers"))
        .json(&json!({"business_id": business_id, "name": ""}))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["error"], "Validation error");

    let response = client
        .post(app.url("/api/customers"))
        .json(&json!({
            "business_id": business_id,
            "name": "Valid Name",
            "email": "not-an-email"
        }))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status(), 400);

    app.cleanup().await;
}

#[tokio::test]
async fn create_customer_for_unknown_business_returns_404() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };
    let client = Client::new();

    let response = client
        .post(app.url("/api/customers"))
        .json(&json!({"business_id": Uuid::new_v4(), "name": "Orphan"}))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status(), 404);

    app.cleanup().await;
}

#[tokio::test]
async fn list_customers_filters_and_searches() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };
    let (business_a, _) = app.seed_business("INV-", 1, 5).await;
    let (business_b, _) = app.seed_business("B-", 1, 5).await;
    let client = Client::new();

    for (business_id, name, email) in [
        (business_a, "Asha Traders", "asha@example.com"),
        (business_a, "Binod Metals", "sales@binodmetals.in"),
        (business_b, "Other Shopper", "other@example.com"),
    ] {
        let response = client
            .post(app.url("/api/customers"))
            .json(&json!({"business_id": business_id, "name": name, "email": email}))
            .send()
            .await
            .expect("Failed to execute request");
        assert_eq!(response.status(), 201);
    }

    let response = client
        .get(app.url(&format!("/api/customers?businessId={}", business_a)))
        .send()
        .await
        .expect("Failed to execute request");
    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["total"], 2);

    // Search hits the email column too
    let response = client
        .get(app.url(&format!(
            "/api/customers?businessId={}&search=binodmetals",
            business_a
        )))
        .send()
        .await
        .expect("Failed to execute request");
    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["total"], 1);
    assert_eq!(body["data"][0]["name"], "Binod Metals");

    app.cleanup().await;
}

#[tokio::test]
async fn delete_customer_referenced_by_invoice_returns_409() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };
    let (business_id, shop_id) = app.seed_business("INV-", 1, 5).await;
    let customer_id = app.seed_customer(business_id, "Asha Traders").await;
    let client = Client::new();

    let response = client
        .post(app.url("/api/invoices"))
        .json(&json!({
            "business_id": business_id,
            "shop_id": shop_id,
            "customer_id": customer_id,
            "items": [{"description": "Widget", "quantity": 1, "unit_price": 100}]
        }))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status(), 201);

    let response = client
        .delete(app.url(&format!("/api/customers/{}", customer_id)))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status(), 409);

    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert!(body["error"].as_str().unwrap().contains("referenced"));

    app.cleanup().await;
}
