//! Database service for billing-service.

use crate::models::{
    can_transition, compute_line, compute_totals, format_invoice_number, resolve_patch,
    round_money, Business,
    Customer, Invoice, InvoiceItem, InvoicePatch, InvoiceStatus, InvoiceSummary, InvoiceTotals,
    InvoiceWithCustomer, ListCustomersFilter, ListInvoicesFilter, ListProductsFilter, NewCustomer,
    NewInvoice, NewProduct, PatchOutcome, Product, Shop, UpdateBusinessSettings, UpdateCustomer,
    UpdateProduct, UpdateShop,
};
use crate::services::metrics::{
    record_error, DB_QUERY_DURATION, INVOICES_TOTAL, INVOICE_AMOUNT_TOTAL, INVOICE_PATCHES_TOTAL,
};
use rust_decimal::prelude::ToPrimitive;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const INVOICE_COLUMNS: &str = "id, shop_id, business_id, customer_id, number, issue_date, \
    due_date, status, notes, sub_total, discount_total, tax_total, grand_total, amount_paid, \
    created_at, updated_at";

const BUSINESS_COLUMNS: &str = "id, name, legal_name, gst_number, email, phone, address, city, \
    state, country, pincode, currency, default_tax_type, default_tax_rate, default_hsn, \
    invoice_prefix, invoice_next_number, invoice_number_padding, brand_logo, brand_color, \
    created_at, updated_at";

const CUSTOMER_COLUMNS: &str = "id, business_id, name, email, phone, gst_number, address, city, \
    state, country, pincode, created_at, updated_at";

const PRODUCT_COLUMNS: &str = "id, business_id, sku, name, description, unit_price, tax_rate, \
    tax_type, hsn_code, is_active, created_at, updated_at";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "billing-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Business Operations
    // -------------------------------------------------------------------------

    /// Fetch a business by id.
    #[instrument(skip(self), fields(business_id = %business_id))]
    pub async fn get_business(&self, business_id: Uuid) -> Result<Option<Business>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_business"])
            .start_timer();

        let business = sqlx::query_as::<_, Business>(&format!(
            "SELECT {} FROM businesses WHERE id = $1",
            BUSINESS_COLUMNS
        ))
        .bind(business_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to fetch business: {}", e)))?;

        timer.observe_duration();

        Ok(business)
    }

    /// Update business profile and invoice numbering settings.
    /// Absent fields keep their current values.
    #[instrument(skip(self, update), fields(business_id = %business_id))]
    pub async fn update_business_settings(
        &self,
        business_id: Uuid,
        update: &UpdateBusinessSettings,
    ) -> Result<Option<Business>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_business_settings"])
            .start_timer();

        let business = sqlx::query_as::<_, Business>(&format!(
            r#"
            UPDATE businesses
            SET name = COALESCE($2, name),
                legal_name = COALESCE($3, legal_name),
                gst_number = COALESCE($4, gst_number),
                email = COALESCE($5, email),
                phone = COALESCE($6, phone),
                address = COALESCE($7, address),
                city = COALESCE($8, city),
                state = COALESCE($9, state),
                pincode = COALESCE($10, pincode),
                currency = COALESCE($11, currency),
                default_tax_type = COALESCE($12, default_tax_type),
                default_tax_rate = COALESCE($13, default_tax_rate),
                default_hsn = COALESCE($14, default_hsn),
                invoice_prefix = COALESCE($15, invoice_prefix),
                invoice_next_number = COALESCE($16, invoice_next_number),
                invoice_number_padding = COALESCE($17, invoice_number_padding),
                brand_logo = COALESCE($18, brand_logo),
                brand_color = COALESCE($19, brand_color),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            BUSINESS_COLUMNS
        ))
        .bind(business_id)
        .bind(&update.name)
        .bind(&update.legal_name)
        .bind(&update.gst_number)
        .bind(&update.email)
        .bind(&update.phone)
        .bind(&update.address)
        .bind(&update.city)
        .bind(&update.state)
        .bind(&update.pincode)
        .bind(&update.currency)
        .bind(&update.default_tax_type)
        .bind(update.default_tax_rate)
        .bind(&update.default_hsn)
        .bind(&update.invoice_prefix)
        .bind(update.invoice_next_number)
        .bind(update.invoice_number_padding)
        .bind(&update.brand_logo)
        .bind(&update.brand_color)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update business: {}", e))
        })?;

        timer.observe_duration();

        if let Some(business) = &business {
            info!(business_id = %business.id, "Business settings updated");
        }

        Ok(business)
    }

    // -------------------------------------------------------------------------
    // Shop Operations
    // -------------------------------------------------------------------------

    /// Fetch a shop by id.
    #[instrument(skip(self), fields(shop_id = %shop_id))]
    pub async fn get_shop(&self, shop_id: Uuid) -> Result<Option<Shop>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_shop"])
            .start_timer();

        let shop = sqlx::query_as::<_, Shop>(
            r#"
            SELECT id, business_id, name, address, phone, email, created_at, updated_at
            FROM shops
            WHERE id = $1
            "#,
        )
        .bind(shop_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to fetch shop: {}", e)))?;

        timer.observe_duration();

        Ok(shop)
    }

    /// Update a shop profile. Absent fields keep their current values.
    #[instrument(skip(self, update), fields(shop_id = %shop_id))]
    pub async fn update_shop(
        &self,
        shop_id: Uuid,
        update: &UpdateShop,
    ) -> Result<Option<Shop>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_shop"])
            .start_timer();

        let shop = sqlx::query_as::<_, Shop>(
            r#"
            UPDATE shops
            SET name = COALESCE($2, name),
                address = COALESCE($3, address),
                phone = COALESCE($4, phone),
                email = COALESCE($5, email),
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, business_id, name, address, phone, email, created_at, updated_at
            "#,
        )
        .bind(shop_id)
        .bind(&update.name)
        .bind(&update.address)
        .bind(&update.phone)
        .bind(&update.email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update shop: {}", e)))?;

        timer.observe_duration();

        Ok(shop)
    }

    // -------------------------------------------------------------------------
    // Customer Operations
    // -------------------------------------------------------------------------

    /// Create a new customer.
    #[instrument(skip(self, input), fields(business_id = %input.business_id))]
    pub async fn create_customer(&self, input: &NewCustomer) -> Result<Customer, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_customer"])
            .start_timer();

        let customer = sqlx::query_as::<_, Customer>(&format!(
            r#"
            INSERT INTO customers (id, business_id, name, email, phone, gst_number, address, city, state, country, pincode)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, COALESCE($10, 'IN'), $11)
            RETURNING {}
            "#,
            CUSTOMER_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(input.business_id)
        .bind(&input.name)
        .bind(&input.email)
        .bind(&input.phone)
        .bind(&input.gst_number)
        .bind(&input.address)
        .bind(&input.city)
        .bind(&input.state)
        .bind(&input.country)
        .bind(&input.pincode)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_foreign_key_violation() => {
                AppError::NotFound(anyhow::anyhow!("Business {} not found", input.business_id))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create customer: {}", e)),
        })?;

        timer.observe_duration();

        info!(customer_id = %customer.id, name = %customer.name, "Customer created");

        Ok(customer)
    }

    /// Fetch a customer by id.
    #[instrument(skip(self), fields(customer_id = %customer_id))]
    pub async fn get_customer(&self, customer_id: Uuid) -> Result<Option<Customer>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_customer"])
            .start_timer();

        let customer = sqlx::query_as::<_, Customer>(&format!(
            "SELECT {} FROM customers WHERE id = $1",
            CUSTOMER_COLUMNS
        ))
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to fetch customer: {}", e)))?;

        timer.observe_duration();

        Ok(customer)
    }

    /// List customers with optional business filter and name/email/phone search.
    #[instrument(skip(self, filter))]
    pub async fn list_customers(
        &self,
        filter: &ListCustomersFilter,
    ) -> Result<(Vec<Customer>, i64), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_customers"])
            .start_timer();

        let limit = filter.limit.clamp(1, 100);
        let offset = filter.offset.max(0);
        let pattern = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{}%", s));

        let customers = sqlx::query_as::<_, Customer>(&format!(
            r#"
            SELECT {}
            FROM customers
            WHERE ($1::uuid IS NULL OR business_id = $1)
              AND ($2::text IS NULL OR name ILIKE $2 OR email ILIKE $2 OR phone ILIKE $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
            CUSTOMER_COLUMNS
        ))
        .bind(filter.business_id)
        .bind(&pattern)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list customers: {}", e)))?;

        let total = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM customers
            WHERE ($1::uuid IS NULL OR business_id = $1)
              AND ($2::text IS NULL OR name ILIKE $2 OR email ILIKE $2 OR phone ILIKE $2)
            "#,
        )
        .bind(filter.business_id)
        .bind(&pattern)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to count customers: {}", e))
        })?;

        timer.observe_duration();

        Ok((customers, total))
    }

    /// Update a customer record. Absent fields keep their current values.
    #[instrument(skip(self, update), fields(customer_id = %customer_id))]
    pub async fn update_customer(
        &self,
        customer_id: Uuid,
        update: &UpdateCustomer,
    ) -> Result<Option<Customer>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_customer"])
            .start_timer();

        let customer = sqlx::query_as::<_, Customer>(&format!(
            r#"
            UPDATE customers
            SET name = COALESCE($2, name),
                email = COALESCE($3, email),
                phone = COALESCE($4, phone),
                gst_number = COALESCE($5, gst_number),
                address = COALESCE($6, address),
                city = COALESCE($7, city),
                state = COALESCE($8, state),
                country = COALESCE($9, country),
                pincode = COALESCE($10, pincode),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            CUSTOMER_COLUMNS
        ))
        .bind(customer_id)
        .bind(&update.name)
        .bind(&update.email)
        .bind(&update.phone)
        .bind(&update.gst_number)
        .bind(&update.address)
        .bind(&update.city)
        .bind(&update.state)
        .bind(&update.country)
        .bind(&update.pincode)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update customer: {}", e))
        })?;

        timer.observe_duration();

        Ok(customer)
    }

    /// Delete a customer. Returns false if no row matched.
    #[instrument(skip(self), fields(customer_id = %customer_id))]
    pub async fn delete_customer(&self, customer_id: Uuid) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_customer"])
            .start_timer();

        let result = sqlx::query("DELETE FROM customers WHERE id = $1")
            .bind(customer_id)
            .execute(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db_err) if db_err.is_foreign_key_violation() => {
                    AppError::Conflict(anyhow::anyhow!(
                        "Customer is referenced by existing invoices"
                    ))
                }
                _ => AppError::DatabaseError(anyhow::anyhow!("Failed to delete customer: {}", e)),
            })?;

        timer.observe_duration();

        Ok(result.rows_affected() > 0)
    }

    // -------------------------------------------------------------------------
    // Product Operations
    // -------------------------------------------------------------------------

    /// Create a new catalog product.
    #[instrument(skip(self, input), fields(business_id = %input.business_id))]
    pub async fn create_product(&self, input: &NewProduct) -> Result<Product, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_product"])
            .start_timer();

        let product = sqlx::query_as::<_, Product>(&format!(
            r#"
            INSERT INTO products (id, business_id, sku, name, description, unit_price, tax_rate, tax_type, hsn_code, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, COALESCE($8, 'GST'), $9, COALESCE($10, true))
            RETURNING {}
            "#,
            PRODUCT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(input.business_id)
        .bind(&input.sku)
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.unit_price)
        .bind(input.tax_rate)
        .bind(&input.tax_type)
        .bind(&input.hsn_code)
        .bind(input.is_active)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!("Product SKU is already in use"))
            }
            sqlx::Error::Database(ref db_err) if db_err.is_foreign_key_violation() => {
                AppError::NotFound(anyhow::anyhow!("Business {} not found", input.business_id))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create product: {}", e)),
        })?;

        timer.observe_duration();

        info!(product_id = %product.id, name = %product.name, "Product created");

        Ok(product)
    }

    /// Fetch a product by id.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn get_product(&self, product_id: Uuid) -> Result<Option<Product>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_product"])
            .start_timer();

        let product = sqlx::query_as::<_, Product>(&format!(
            "SELECT {} FROM products WHERE id = $1",
            PRODUCT_COLUMNS
        ))
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to fetch product: {}", e)))?;

        timer.observe_duration();

        Ok(product)
    }

    /// List products with optional business filter and name/sku search.
    #[instrument(skip(self, filter))]
    pub async fn list_products(
        &self,
        filter: &ListProductsFilter,
    ) -> Result<(Vec<Product>, i64), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_products"])
            .start_timer();

        let limit = filter.limit.clamp(1, 100);
        let offset = filter.offset.max(0);
        let pattern = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{}%", s));

        let products = sqlx::query_as::<_, Product>(&format!(
            r#"
            SELECT {}
            FROM products
            WHERE ($1::uuid IS NULL OR business_id = $1)
              AND ($2::text IS NULL OR name ILIKE $2 OR sku ILIKE $2)
              AND (NOT $3 OR is_active)
            ORDER BY created_at DESC
            LIMIT $4 OFFSET $5
            "#,
            PRODUCT_COLUMNS
        ))
        .bind(filter.business_id)
        .bind(&pattern)
        .bind(filter.active_only)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list products: {}", e)))?;

        let total = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM products
            WHERE ($1::uuid IS NULL OR business_id = $1)
              AND ($2::text IS NULL OR name ILIKE $2 OR sku ILIKE $2)
              AND (NOT $3 OR is_active)
            "#,
        )
        .bind(filter.business_id)
        .bind(&pattern)
        .bind(filter.active_only)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to count products: {}", e)))?;

        timer.observe_duration();

        Ok((products, total))
    }

    /// Update a product record. Absent fields keep their current values.
    #[instrument(skip(self, update), fields(product_id = %product_id))]
    pub async fn update_product(
        &self,
        product_id: Uuid,
        update: &UpdateProduct,
    ) -> Result<Option<Product>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_product"])
            .start_timer();

        let product = sqlx::query_as::<_, Product>(&format!(
            r#"
            UPDATE products
            SET sku = COALESCE($2, sku),
                name = COALESCE($3, name),
                description = COALESCE($4, description),
                unit_price = COALESCE($5, unit_price),
                tax_rate = COALESCE($6, tax_rate),
                tax_type = COALESCE($7, tax_type),
                hsn_code = COALESCE($8, hsn_code),
                is_active = COALESCE($9, is_active),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            PRODUCT_COLUMNS
        ))
        .bind(product_id)
        .bind(&update.sku)
        .bind(&update.name)
        .bind(&update.description)
        .bind(update.unit_price)
        .bind(update.tax_rate)
        .bind(&update.tax_type)
        .bind(&update.hsn_code)
        .bind(update.is_active)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!("Product SKU is already in use"))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to update product: {}", e)),
        })?;

        timer.observe_duration();

        Ok(product)
    }

    /// Delete a product. Returns false if no row matched.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn delete_product(&self, product_id: Uuid) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_product"])
            .start_timer();

        let result = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(product_id)
            .execute(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db_err) if db_err.is_foreign_key_violation() => {
                    AppError::Conflict(anyhow::anyhow!(
                        "Product is referenced by existing invoice items"
                    ))
                }
                _ => AppError::DatabaseError(anyhow::anyhow!("Failed to delete product: {}", e)),
            })?;

        timer.observe_duration();

        Ok(result.rows_affected() > 0)
    }

    // -------------------------------------------------------------------------
    // Invoice Operations
    // -------------------------------------------------------------------------

    /// Create an invoice with its items, allocating the next invoice number
    /// from the business counter inside a single transaction.
    ///
    /// A number collision with a concurrent writer is retried once before
    /// surfacing a conflict.
    #[instrument(skip(self, input), fields(business_id = %input.business_id, shop_id = %input.shop_id))]
    pub async fn create_invoice(&self, input: &NewInvoice) -> Result<Invoice, AppError> {
        let totals = compute_totals(&input.items)?;

        match self.try_create_invoice(input, &totals).await {
            Err(AppError::Conflict(e)) => {
                warn!(
                    business_id = %input.business_id,
                    error = %e,
                    "Invoice number collision, retrying once"
                );
                self.try_create_invoice(input, &totals).await
            }
            other => other,
        }
    }

    async fn try_create_invoice(
        &self,
        input: &NewInvoice,
        totals: &InvoiceTotals,
    ) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_invoice"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        // Idempotent replay: a previous request with the same key wins
        if let Some(key) = input.idempotency_key.as_deref() {
            let existing = sqlx::query_as::<_, Invoice>(&format!(
                "SELECT {} FROM invoices WHERE business_id = $1 AND idempotency_key = $2",
                INVOICE_COLUMNS
            ))
            .bind(input.business_id)
            .bind(key)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to check idempotency: {}", e))
            })?;

            if let Some(invoice) = existing {
                tx.rollback().await.ok();
                timer.observe_duration();
                info!(
                    invoice_id = %invoice.id,
                    number = %invoice.number,
                    "Returning existing invoice for idempotency key"
                );
                return Ok(invoice);
            }
        }

        // Allocate the invoice number under a row lock on the business counter
        let counter = sqlx::query_as::<_, (String, i32, i32, String)>(
            r#"
            SELECT invoice_prefix, invoice_next_number, invoice_number_padding, currency
            FROM businesses
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(input.business_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to lock business counter: {}", e))
        })?;

        let Some((prefix, next_number, padding, currency)) = counter else {
            tx.rollback().await.ok();
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Business {} not found",
                input.business_id
            )));
        };

        let number = format_invoice_number(&prefix, next_number, padding);
        let status = input.status.unwrap_or(InvoiceStatus::Issued);

        let result = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            INSERT INTO invoices (
                id, shop_id, business_id, customer_id, number, issue_date, due_date, status, notes,
                sub_total, discount_total, tax_total, grand_total, amount_paid, idempotency_key
            )
            VALUES ($1, $2, $3, $4, $5, COALESCE($6, CURRENT_DATE), $7, $8, $9, $10, $11, $12, $13, 0, $14)
            RETURNING {}
            "#,
            INVOICE_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(input.shop_id)
        .bind(input.business_id)
        .bind(input.customer_id)
        .bind(&number)
        .bind(input.issue_date)
        .bind(input.due_date)
        .bind(status.as_str())
        .bind(&input.notes)
        .bind(totals.sub_total)
        .bind(totals.discount_total)
        .bind(totals.tax_total)
        .bind(totals.grand_total)
        .bind(input.idempotency_key.as_deref())
        .fetch_one(&mut *tx)
        .await;

        let invoice = match result {
            Ok(invoice) => invoice,
            Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => {
                tx.rollback().await.ok();
                if db_err.constraint() == Some("idx_invoices_idempotency") {
                    // Idempotency race: another request with the same key won
                    if let Some(key) = input.idempotency_key.as_deref() {
                        let existing = sqlx::query_as::<_, Invoice>(&format!(
                            "SELECT {} FROM invoices WHERE business_id = $1 AND idempotency_key = $2",
                            INVOICE_COLUMNS
                        ))
                        .bind(input.business_id)
                        .bind(key)
                        .fetch_optional(&self.pool)
                        .await
                        .map_err(|e| {
                            AppError::DatabaseError(anyhow::anyhow!(
                                "Failed to fetch existing invoice: {}",
                                e
                            ))
                        })?;

                        if let Some(invoice) = existing {
                            timer.observe_duration();
                            return Ok(invoice);
                        }
                    }
                    return Err(AppError::Conflict(anyhow::anyhow!(
                        "Duplicate idempotency key"
                    )));
                }
                record_error("number_conflict");
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Invoice number {} already allocated",
                    number
                )));
            }
            Err(sqlx::Error::Database(ref db_err)) if db_err.is_foreign_key_violation() => {
                record_error("invalid_reference");
                return Err(AppError::NotFound(anyhow::anyhow!(
                    "Referenced shop or customer does not exist"
                )));
            }
            Err(e) => {
                return Err(AppError::DatabaseError(anyhow::anyhow!(
                    "Failed to insert invoice: {}",
                    e
                )));
            }
        };

        sqlx::query(
            r#"
            UPDATE businesses
            SET invoice_next_number = invoice_next_number + 1, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(input.business_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to advance invoice counter: {}", e))
        })?;

        self.insert_invoice_items(&mut tx, invoice.id, input).await?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();

        INVOICES_TOTAL.with_label_values(&[&invoice.status]).inc();
        if let Some(amount) = invoice.grand_total.to_f64() {
            INVOICE_AMOUNT_TOTAL
                .with_label_values(&[&currency])
                .inc_by(amount.abs());
        }

        info!(
            invoice_id = %invoice.id,
            number = %invoice.number,
            grand_total = %invoice.grand_total,
            item_count = input.items.len(),
            "Invoice created"
        );

        Ok(invoice)
    }

    /// Insert line items for an invoice inside an open transaction.
    async fn insert_invoice_items(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        invoice_id: Uuid,
        input: &NewInvoice,
    ) -> Result<(), AppError> {
        for item in &input.items {
            let amounts = compute_line(
                item.quantity,
                item.unit_price,
                item.discount,
                item.tax_rate,
                item.tax_type,
            )?;

            let result = sqlx::query(
                r#"
                INSERT INTO invoice_items (
                    id, invoice_id, product_id, description, quantity, unit_price,
                    discount, tax_rate, tax_type, line_total
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(invoice_id)
            .bind(item.product_id)
            .bind(&item.description)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.discount)
            .bind(item.tax_rate)
            .bind(item.tax_type.as_str())
            .bind(round_money(amounts.line_total))
            .execute(&mut **tx)
            .await;

            match result {
                Ok(_) => {}
                Err(sqlx::Error::Database(ref db_err)) if db_err.is_foreign_key_violation() => {
                    return Err(AppError::NotFound(anyhow::anyhow!(
                        "Referenced product does not exist"
                    )));
                }
                Err(e) => {
                    return Err(AppError::DatabaseError(anyhow::anyhow!(
                        "Failed to insert invoice item: {}",
                        e
                    )));
                }
            }
        }

        Ok(())
    }

    /// Fetch an invoice with its customer name and line items.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn get_invoice_with_items(
        &self,
        invoice_id: Uuid,
    ) -> Result<Option<(InvoiceWithCustomer, Vec<InvoiceItem>)>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, InvoiceWithCustomer>(
            r#"
            SELECT i.id, i.shop_id, i.business_id, i.customer_id, i.number, i.issue_date,
                i.due_date, i.status, i.notes, i.sub_total, i.discount_total, i.tax_total,
                i.grand_total, i.amount_paid, i.created_at, i.updated_at,
                c.name AS customer_name
            FROM invoices i
            LEFT JOIN customers c ON c.id = i.customer_id
            WHERE i.id = $1
            "#,
        )
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to fetch invoice: {}", e)))?;

        let Some(invoice) = invoice else {
            timer.observe_duration();
            return Ok(None);
        };

        let items = sqlx::query_as::<_, InvoiceItem>(
            r#"
            SELECT id, invoice_id, product_id, description, quantity, unit_price, discount,
                tax_rate, tax_type, line_total, created_at
            FROM invoice_items
            WHERE invoice_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to fetch invoice items: {}", e))
        })?;

        timer.observe_duration();

        Ok(Some((invoice, items)))
    }

    /// List invoices with customer names, newest first.
    #[instrument(skip(self, filter))]
    pub async fn list_invoices(
        &self,
        filter: &ListInvoicesFilter,
    ) -> Result<(Vec<InvoiceSummary>, i64), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoices"])
            .start_timer();

        let limit = filter.limit.clamp(1, 100);
        let offset = filter.offset.max(0);
        let pattern = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{}%", s));

        let invoices = sqlx::query_as::<_, InvoiceSummary>(
            r#"
            SELECT i.id, i.number, i.status, i.issue_date, i.due_date,
                i.sub_total, i.discount_total, i.tax_total, i.grand_total, i.amount_paid,
                i.business_id, i.shop_id, i.customer_id, i.created_at, i.updated_at,
                c.name AS customer_name
            FROM invoices i
            LEFT JOIN customers c ON c.id = i.customer_id
            WHERE ($1::uuid IS NULL OR i.business_id = $1)
              AND ($2::uuid IS NULL OR i.shop_id = $2)
              AND ($3::text IS NULL OR i.number ILIKE $3 OR c.name ILIKE $3)
            ORDER BY i.created_at DESC
            LIMIT $4 OFFSET $5
            "#,
        )
        .bind(filter.business_id)
        .bind(filter.shop_id)
        .bind(&pattern)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list invoices: {}", e)))?;

        let total = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM invoices i
            LEFT JOIN customers c ON c.id = i.customer_id
            WHERE ($1::uuid IS NULL OR i.business_id = $1)
              AND ($2::uuid IS NULL OR i.shop_id = $2)
              AND ($3::text IS NULL OR i.number ILIKE $3 OR c.name ILIKE $3)
            "#,
        )
        .bind(filter.business_id)
        .bind(filter.shop_id)
        .bind(&pattern)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to count invoices: {}", e)))?;

        timer.observe_duration();

        Ok((invoices, total))
    }

    /// Replace an invoice's header fields and its full item set, keeping the
    /// allocated number and payment state untouched.
    #[instrument(skip(self, input), fields(invoice_id = %invoice_id))]
    pub async fn replace_invoice(
        &self,
        invoice_id: Uuid,
        input: &NewInvoice,
    ) -> Result<Invoice, AppError> {
        let totals = compute_totals(&input.items)?;

        let timer = DB_QUERY_DURATION
            .with_label_values(&["replace_invoice"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let exists = sqlx::query_scalar::<_, Uuid>("SELECT id FROM invoices WHERE id = $1")
            .bind(invoice_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to fetch invoice: {}", e))
            })?;

        if exists.is_none() {
            tx.rollback().await.ok();
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Invoice {} not found",
                invoice_id
            )));
        }

        let status = input.status.unwrap_or(InvoiceStatus::Issued);

        let result = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            UPDATE invoices
            SET shop_id = $2, business_id = $3, customer_id = $4,
                issue_date = COALESCE($5, issue_date), due_date = $6,
                status = $7, notes = $8,
                sub_total = $9, discount_total = $10, tax_total = $11, grand_total = $12,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            INVOICE_COLUMNS
        ))
        .bind(invoice_id)
        .bind(input.shop_id)
        .bind(input.business_id)
        .bind(input.customer_id)
        .bind(input.issue_date)
        .bind(input.due_date)
        .bind(status.as_str())
        .bind(&input.notes)
        .bind(totals.sub_total)
        .bind(totals.discount_total)
        .bind(totals.tax_total)
        .bind(totals.grand_total)
        .fetch_one(&mut *tx)
        .await;

        let invoice = match result {
            Ok(invoice) => invoice,
            Err(sqlx::Error::Database(ref db_err)) if db_err.is_foreign_key_violation() => {
                record_error("invalid_reference");
                return Err(AppError::NotFound(anyhow::anyhow!(
                    "Referenced business, shop, or customer does not exist"
                )));
            }
            Err(e) => {
                return Err(AppError::DatabaseError(anyhow::anyhow!(
                    "Failed to update invoice: {}",
                    e
                )));
            }
        };

        sqlx::query("DELETE FROM invoice_items WHERE invoice_id = $1")
            .bind(invoice_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to delete invoice items: {}", e))
            })?;

        self.insert_invoice_items(&mut tx, invoice_id, input).await?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();

        info!(
            invoice_id = %invoice.id,
            number = %invoice.number,
            grand_total = %invoice.grand_total,
            item_count = input.items.len(),
            "Invoice replaced"
        );

        Ok(invoice)
    }

    /// Apply a status and/or payment patch under a row lock.
    ///
    /// A patch that changes nothing skips the write and returns the current
    /// row, leaving updated_at untouched.
    #[instrument(skip(self, patch), fields(invoice_id = %invoice_id))]
    pub async fn patch_invoice(
        &self,
        invoice_id: Uuid,
        patch: &InvoicePatch,
        strict_transitions: bool,
    ) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["patch_invoice"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let current = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {} FROM invoices WHERE id = $1 FOR UPDATE",
            INVOICE_COLUMNS
        ))
        .bind(invoice_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to fetch invoice: {}", e)))?;

        let Some(current) = current else {
            tx.rollback().await.ok();
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Invoice {} not found",
                invoice_id
            )));
        };

        let current_status = InvoiceStatus::from_string(&current.status);

        if strict_transitions {
            if let Some(target) = patch.status {
                if !can_transition(current_status, target) {
                    tx.rollback().await.ok();
                    record_error("status_transition");
                    return Err(AppError::Conflict(anyhow::anyhow!(
                        "Status transition {} -> {} is not allowed",
                        current_status.as_str(),
                        target.as_str()
                    )));
                }
            }
        }

        let outcome = resolve_patch(
            current_status,
            current.amount_paid,
            current.grand_total,
            patch,
        );

        let (status, amount_paid) = match outcome {
            PatchOutcome::Unchanged => {
                tx.rollback().await.ok();
                timer.observe_duration();
                info!(invoice_id = %current.id, "Patch is a no-op, returning current invoice");
                return Ok(current);
            }
            PatchOutcome::Apply {
                status,
                amount_paid,
            } => (status, amount_paid),
        };

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            UPDATE invoices
            SET status = $2, amount_paid = $3, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            INVOICE_COLUMNS
        ))
        .bind(invoice_id)
        .bind(status.as_str())
        .bind(amount_paid)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update invoice: {}", e)))?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();

        INVOICE_PATCHES_TOTAL
            .with_label_values(&[&invoice.status])
            .inc();

        info!(
            invoice_id = %invoice.id,
            status = %invoice.status,
            amount_paid = %invoice.amount_paid,
            "Invoice patched"
        );

        Ok(invoice)
    }

    /// Delete an invoice and its items.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn delete_invoice(&self, invoice_id: Uuid) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_invoice"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        sqlx::query("DELETE FROM invoice_items WHERE invoice_id = $1")
            .bind(invoice_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to delete invoice items: {}", e))
            })?;

        let deleted = sqlx::query_scalar::<_, Uuid>("DELETE FROM invoices WHERE id = $1 RETURNING id")
            .bind(invoice_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to delete invoice: {}", e))
            })?;

        if deleted.is_none() {
            tx.rollback().await.ok();
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Invoice {} not found",
                invoice_id
            )));
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();

        info!(invoice_id = %invoice_id, "Invoice deleted");

        Ok(())
    }
}
