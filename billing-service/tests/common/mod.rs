//! Test helper module for billing-service integration tests.
//!
//! Provides common setup utilities for PostgreSQL-based tests. Each test
//! runs against its own schema so tests can execute in parallel.

#![allow(dead_code)]

use billing_service::config::{BillingConfig, DatabaseConfig};
use billing_service::services::{init_metrics, Database};
use billing_service::startup::Application;
use rust_decimal::Decimal;
use service_core::config::Config as CoreConfig;
use std::sync::atomic::{AtomicU32, Ordering};
use uuid::Uuid;

// Counter for unique schema names
static SCHEMA_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Get the database URL for testing, if one is configured.
///
/// Returns `None` when TEST_DATABASE_URL is not set so integration tests
/// skip instead of failing on machines without PostgreSQL.
pub fn get_test_database_url() -> Option<String> {
    std::env::var("TEST_DATABASE_URL").ok()
}

/// Generate a unique schema name for test isolation.
fn unique_schema_name() -> String {
    let counter = SCHEMA_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("test_billing_{}_{}", std::process::id(), counter)
}

/// Test application wrapper for integration tests.
pub struct TestApp {
    pub http_address: String,
    pub http_port: u16,
    pub db: Database,
    schema_name: String,
}

impl TestApp {
    /// Spawn a new test application on a random port.
    ///
    /// Returns `None` when no test database is configured.
    pub async fn spawn() -> Option<Self> {
        Self::spawn_with_options(false).await
    }

    /// Spawn a test application that enforces strict status transitions.
    pub async fn spawn_strict() -> Option<Self> {
        Self::spawn_with_options(true).await
    }

    async fn spawn_with_options(strict_status_transitions: bool) -> Option<Self> {
        // Initialize metrics (required for metrics endpoint test)
        init_metrics();

        let Some(base_url) = get_test_database_url() else {
            eprintln!("Skipping test: TEST_DATABASE_URL is not set");
            return None;
        };
        let schema_name = unique_schema_name();

        // Create schema for test isolation
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(2)
            .connect(&base_url)
            .await
            .expect("Failed to connect to test database");

        sqlx::query(&format!("DROP SCHEMA IF EXISTS {} CASCADE", schema_name))
            .execute(&pool)
            .await
            .ok();
        sqlx::query(&format!("CREATE SCHEMA {}", schema_name))
            .execute(&pool)
            .await
            .expect("Failed to create test schema");

        // Close the setup pool
        pool.close().await;

        // Create config with schema in search path
        // Use ? or & depending on whether URL already has query parameters
        let separator = if base_url.contains('?') { "&" } else { "?" };
        let db_url_with_schema = format!(
            "{}{}options=-c search_path%3D{}",
            base_url, separator, schema_name
        );

        let config = BillingConfig {
            common: CoreConfig {
                port: 0, // Random port
                environment: "dev".to_string(),
            },
            service_name: "billing-service-test".to_string(),
            log_level: "warn".to_string(),
            otlp_endpoint: None,
            database: DatabaseConfig {
                url: db_url_with_schema.clone(),
                max_connections: 5,
                min_connections: 1,
            },
            strict_status_transitions,
        };

        let app = Application::build(config)
            .await
            .expect("Failed to build test application");

        let http_port = app.http_port();
        let db = Database::new(&db_url_with_schema, 5, 1)
            .await
            .expect("Failed to create test database");

        let http_address = format!("http://127.0.0.1:{}", http_port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for the HTTP server to be ready by polling the health endpoint
        let client = reqwest::Client::new();
        let health_url = format!("http://127.0.0.1:{}/health", http_port);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        Some(TestApp {
            http_address,
            http_port,
            db,
            schema_name,
        })
    }

    /// Build a full URL for a request path.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.http_address, path)
    }

    /// Insert a business with one shop, returning (business_id, shop_id).
    pub async fn seed_business(
        &self,
        prefix: &str,
        next_number: i32,
        padding: i32,
    ) -> (Uuid, Uuid) {
        let business_id = Uuid::new_v4();
        let shop_id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO businesses (id, name, invoice_prefix, invoice_next_number, invoice_number_padding)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(business_id)
        .bind("Test Traders")
        .bind(prefix)
        .bind(next_number)
        .bind(padding)
        .execute(self.db.pool())
        .await
        .expect("Failed to seed business");

        sqlx::query("INSERT INTO shops (id, business_id, name) VALUES ($1, $2, $3)")
            .bind(shop_id)
            .bind(business_id)
            .bind("Main Branch")
            .execute(self.db.pool())
            .await
            .expect("Failed to seed shop");

        (business_id, shop_id)
    }

    /// Insert a customer for the given business, returning its id.
    pub async fn seed_customer(&self, business_id: Uuid, name: &str) -> Uuid {
        let customer_id = Uuid::new_v4();

        sqlx::query("INSERT INTO customers (id, business_id, name) VALUES ($1, $2, $3)")
            .bind(customer_id)
            .bind(business_id)
            .bind(name)
            .execute(self.db.pool())
            .await
            .expect("Failed to seed customer");

        customer_id
    }

    /// Cleanup test resources (schema).
    pub async fn cleanup(&self) {
        let Some(base_url) = get_test_database_url() else {
            return;
        };

        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(1)
            .connect(&base_url)
            .await
            .ok();

        if let Some(pool) = pool {
            let _ = sqlx::query(&format!(
                "DROP SCHEMA IF EXISTS {} CASCADE",
                self.schema_name
            ))
            .execute(&pool)
            .await;
            pool.close().await;
        }
    }
}

/// Parse a money field from a JSON response into a Decimal.
///
/// Monetary amounts are serialized as strings ("224.20"), so comparisons
/// go through Decimal to stay independent of trailing-zero formatting.
pub fn money(value: &serde_json::Value) -> Decimal {
    value
        .as_str()
        .unwrap_or_else(|| panic!("expected money string, got {}", value))
        .parse()
        .expect("Failed to parse money value")
}
