//! PostgreSQL store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::models::{
    DocumentKind, Invoice, InvoiceItem, Payment, Product, ProfitRecord, Quotation, QuotationItem,
    Refund, Service, StockDeduction, StockMovement,
};
use crate::services::metrics::STORE_OP_DURATION;
use crate::store::{Store, StoreError};

const QUOTATION_COLUMNS: &str = "quotation_id, branch_id, client_id, number, status, currency, \
     vat_enabled, vat_rate, discount_amount, subtotal_amount, vat_amount, total_amount, \
     valid_until, notes, cancelled_at, cancelled_by, cancel_reason, created_utc, updated_utc";

const INVOICE_COLUMNS: &str = "invoice_id, branch_id, client_id, quotation_id, number, status, \
     currency, vat_rate, issued_at, due_at, notes, prepared_by, signed_by, signed_at, \
     cancelled_at, cancelled_by, cancel_reason, stock_deducted_at, subtotal_amount, vat_amount, \
     total_amount, created_utc, updated_utc";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new connection pool.
    #[instrument(skip(database_url))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, StoreError> {
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
            .map_err(|e| map_err("connect", e))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| map_err("health_check", e))?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(anyhow::anyhow!("migration failed: {e}")))?;
        info!("Database migrations completed");
        Ok(())
    }
}

fn map_err(context: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            StoreError::Conflict(format!("{context}: unique constraint violated"))
        }
        sqlx::Error::PoolTimedOut => StoreError::Contention(format!("{context}: pool timed out")),
        other => StoreError::Backend(anyhow::anyhow!("{context}: {other}")),
    }
}

#[async_trait]
impl Store for PgStore {
    #[instrument(skip(self))]
    async fn next_sequence(&self, kind: DocumentKind, year: i32) -> Result<i64, StoreError> {
        let timer = STORE_OP_DURATION
            .with_label_values(&["next_sequence"])
            .start_timer();

        // Single-statement read-or-create + increment; Postgres holds the
        // row lock for the duration of the upsert.
        let next: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO sequence_counters (kind, year, last_number)
            VALUES ($1, $2, 1)
            ON CONFLICT (kind, year)
            DO UPDATE SET last_number = sequence_counters.last_number + 1
            RETURNING last_number
            "#,
        )
        .bind(kind.as_str())
        .bind(year)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_err("next_sequence", e))?;

        timer.observe_duration();

        Ok(next)
    }

    async fn insert_quotation(&self, quotation: &Quotation) -> Result<(), StoreError> {
        let timer = STORE_OP_DURATION
            .with_label_values(&["insert_quotation"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO quotations (
                quotation_id, branch_id, client_id, number, status, currency, vat_enabled,
                vat_rate, discount_amount, subtotal_amount, vat_amount, total_amount,
                valid_until, notes, cancelled_at, cancelled_by, cancel_reason, created_utc, updated_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(quotation.quotation_id)
        .bind(quotation.branch_id)
        .bind(quotation.client_id)
        .bind(&quotation.number)
        .bind(&quotation.status)
        .bind(&quotation.currency)
        .bind(quotation.vat_enabled)
        .bind(quotation.vat_rate)
        .bind(quotation.discount_amount)
        .bind(quotation.subtotal_amount)
        .bind(quotation.vat_amount)
        .bind(quotation.total_amount)
        .bind(quotation.valid_until)
        .bind(&quotation.notes)
        .bind(quotation.cancelled_at)
        .bind(quotation.cancelled_by)
        .bind(&quotation.cancel_reason)
        .bind(quotation.created_utc)
        .bind(quotation.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| map_err("insert_quotation", e))?;

        timer.observe_duration();

        Ok(())
    }

    async fn fetch_quotation(&self, quotation_id: Uuid) -> Result<Option<Quotation>, StoreError> {
        let quotation = sqlx::query_as::<_, Quotation>(&format!(
            "SELECT {QUOTATION_COLUMNS} FROM quotations WHERE quotation_id = $1"
        ))
        .bind(quotation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_err("fetch_quotation", e))?;

        Ok(quotation)
    }

    async fn update_quotation(&self, quotation: &Quotation) -> Result<(), StoreError> {
        let timer = STORE_OP_DURATION
            .with_label_values(&["update_quotation"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE quotations
            SET status = $2,
                vat_enabled = $3,
                vat_rate = $4,
                discount_amount = $5,
                subtotal_amount = $6,
                vat_amount = $7,
                total_amount = $8,
                valid_until = $9,
                notes = $10,
                cancelled_at = $11,
                cancelled_by = $12,
                cancel_reason = $13,
                updated_utc = $14
            WHERE quotation_id = $1
            "#,
        )
        .bind(quotation.quotation_id)
        .bind(&quotation.status)
        .bind(quotation.vat_enabled)
        .bind(quotation.vat_rate)
        .bind(quotation.discount_amount)
        .bind(quotation.subtotal_amount)
        .bind(quotation.vat_amount)
        .bind(quotation.total_amount)
        .bind(quotation.valid_until)
        .bind(&quotation.notes)
        .bind(quotation.cancelled_at)
        .bind(quotation.cancelled_by)
        .bind(&quotation.cancel_reason)
        .bind(quotation.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| map_err("update_quotation", e))?;

        timer.observe_duration();

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "quotation {}",
                quotation.quotation_id
            )));
        }
        Ok(())
    }

    async fn insert_quotation_item(&self, item: &QuotationItem) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO quotation_items (
                item_id, quotation_id, product_id, service_id, description, quantity,
                unit_price, vat_exempt, total_price, created_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(item.item_id)
        .bind(item.quotation_id)
        .bind(item.product_id)
        .bind(item.service_id)
        .bind(&item.description)
        .bind(item.quantity)
        .bind(item.unit_price)
        .bind(item.vat_exempt)
        .bind(item.total_price)
        .bind(item.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| map_err("insert_quotation_item", e))?;

        Ok(())
    }

    async fn fetch_quotation_item(
        &self,
        item_id: Uuid,
    ) -> Result<Option<QuotationItem>, StoreError> {
        let item = sqlx::query_as::<_, QuotationItem>(
            r#"
            SELECT item_id, quotation_id, product_id, service_id, description, quantity,
                unit_price, vat_exempt, total_price, created_utc
            FROM quotation_items
            WHERE item_id = $1
            "#,
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_err("fetch_quotation_item", e))?;

        Ok(item)
    }

    async fn update_quotation_item(&self, item: &QuotationItem) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE quotation_items
            SET description = $2,
                quantity = $3,
                unit_price = $4,
                vat_exempt = $5,
                total_price = $6
            WHERE item_id = $1
            "#,
        )
        .bind(item.item_id)
        .bind(&item.description)
        .bind(item.quantity)
        .bind(item.unit_price)
        .bind(item.vat_exempt)
        .bind(item.total_price)
        .execute(&self.pool)
        .await
        .map_err(|e| map_err("update_quotation_item", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("quotation item {}", item.item_id)));
        }
        Ok(())
    }

    async fn delete_quotation_item(&self, item_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM quotation_items WHERE item_id = $1")
            .bind(item_id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_err("delete_quotation_item", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn fetch_quotation_items(
        &self,
        quotation_id: Uuid,
    ) -> Result<Vec<QuotationItem>, StoreError> {
        let items = sqlx::query_as::<_, QuotationItem>(
            r#"
            SELECT item_id, quotation_id, product_id, service_id, description, quantity,
                unit_price, vat_exempt, total_price, created_utc
            FROM quotation_items
            WHERE quotation_id = $1
            ORDER BY created_utc, item_id
            "#,
        )
        .bind(quotation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_err("fetch_quotation_items", e))?;

        Ok(items)
    }

    #[instrument(skip(self, invoice), fields(invoice_id = %invoice.invoice_id))]
    async fn insert_invoice(&self, invoice: &Invoice) -> Result<(), StoreError> {
        let timer = STORE_OP_DURATION
            .with_label_values(&["insert_invoice"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO invoices (
                invoice_id, branch_id, client_id, quotation_id, number, status, currency,
                vat_rate, issued_at, due_at, notes, prepared_by, signed_by, signed_at,
                cancelled_at, cancelled_by, cancel_reason, stock_deducted_at,
                subtotal_amount, vat_amount, total_amount, created_utc, updated_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                $17, $18, $19, $20, $21, $22, $23)
            "#,
        )
        .bind(invoice.invoice_id)
        .bind(invoice.branch_id)
        .bind(invoice.client_id)
        .bind(invoice.quotation_id)
        .bind(&invoice.number)
        .bind(&invoice.status)
        .bind(&invoice.currency)
        .bind(invoice.vat_rate)
        .bind(invoice.issued_at)
        .bind(invoice.due_at)
        .bind(&invoice.notes)
        .bind(&invoice.prepared_by)
        .bind(&invoice.signed_by)
        .bind(invoice.signed_at)
        .bind(invoice.cancelled_at)
        .bind(invoice.cancelled_by)
        .bind(&invoice.cancel_reason)
        .bind(invoice.stock_deducted_at)
        .bind(invoice.subtotal_amount)
        .bind(invoice.vat_amount)
        .bind(invoice.total_amount)
        .bind(invoice.created_utc)
        .bind(invoice.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| map_err("insert_invoice", e))?;

        timer.observe_duration();

        info!(invoice_id = %invoice.invoice_id, number = %invoice.number, "Invoice inserted");

        Ok(())
    }

    async fn fetch_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, StoreError> {
        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE invoice_id = $1"
        ))
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_err("fetch_invoice", e))?;

        Ok(invoice)
    }

    async fn fetch_invoice_by_quotation(
        &self,
        quotation_id: Uuid,
    ) -> Result<Option<Invoice>, StoreError> {
        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE quotation_id = $1"
        ))
        .bind(quotation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_err("fetch_invoice_by_quotation", e))?;

        Ok(invoice)
    }

    async fn update_invoice(&self, invoice: &Invoice) -> Result<(), StoreError> {
        let timer = STORE_OP_DURATION
            .with_label_values(&["update_invoice"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE invoices
            SET status = $2,
                vat_rate = $3,
                issued_at = $4,
                due_at = $5,
                notes = $6,
                prepared_by = $7,
                signed_by = $8,
                signed_at = $9,
                cancelled_at = $10,
                cancelled_by = $11,
                cancel_reason = $12,
                stock_deducted_at = $13,
                subtotal_amount = $14,
                vat_amount = $15,
                total_amount = $16,
                updated_utc = $17
            WHERE invoice_id = $1
            "#,
        )
        .bind(invoice.invoice_id)
        .bind(&invoice.status)
        .bind(invoice.vat_rate)
        .bind(invoice.issued_at)
        .bind(invoice.due_at)
        .bind(&invoice.notes)
        .bind(&invoice.prepared_by)
        .bind(&invoice.signed_by)
        .bind(invoice.signed_at)
        .bind(invoice.cancelled_at)
        .bind(invoice.cancelled_by)
        .bind(&invoice.cancel_reason)
        .bind(invoice.stock_deducted_at)
        .bind(invoice.subtotal_amount)
        .bind(invoice.vat_amount)
        .bind(invoice.total_amount)
        .bind(invoice.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| map_err("update_invoice", e))?;

        timer.observe_duration();

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("invoice {}", invoice.invoice_id)));
        }
        Ok(())
    }

    async fn insert_invoice_item(&self, item: &InvoiceItem) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO invoice_items (
                item_id, invoice_id, product_id, service_id, description, quantity,
                unit_price, unit_cost, vat_exempt, total_price, created_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(item.item_id)
        .bind(item.invoice_id)
        .bind(item.product_id)
        .bind(item.service_id)
        .bind(&item.description)
        .bind(item.quantity)
        .bind(item.unit_price)
        .bind(item.unit_cost)
        .bind(item.vat_exempt)
        .bind(item.total_price)
        .bind(item.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| map_err("insert_invoice_item", e))?;

        Ok(())
    }

    async fn fetch_invoice_item(&self, item_id: Uuid) -> Result<Option<InvoiceItem>, StoreError> {
        let item = sqlx::query_as::<_, InvoiceItem>(
            r#"
            SELECT item_id, invoice_id, product_id, service_id, description, quantity,
                unit_price, unit_cost, vat_exempt, total_price, created_utc
            FROM invoice_items
            WHERE item_id = $1
            "#,
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_err("fetch_invoice_item", e))?;

        Ok(item)
    }

    async fn update_invoice_item(&self, item: &InvoiceItem) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE invoice_items
            SET description = $2,
                quantity = $3,
                unit_price = $4,
                vat_exempt = $5,
                total_price = $6
            WHERE item_id = $1
            "#,
        )
        .bind(item.item_id)
        .bind(&item.description)
        .bind(item.quantity)
        .bind(item.unit_price)
        .bind(item.vat_exempt)
        .bind(item.total_price)
        .execute(&self.pool)
        .await
        .map_err(|e| map_err("update_invoice_item", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("invoice item {}", item.item_id)));
        }
        Ok(())
    }

    async fn delete_invoice_item(&self, item_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM invoice_items WHERE item_id = $1")
            .bind(item_id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_err("delete_invoice_item", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn fetch_invoice_items(&self, invoice_id: Uuid) -> Result<Vec<InvoiceItem>, StoreError> {
        let items = sqlx::query_as::<_, InvoiceItem>(
            r#"
            SELECT item_id, invoice_id, product_id, service_id, description, quantity,
                unit_price, unit_cost, vat_exempt, total_price, created_utc
            FROM invoice_items
            WHERE invoice_id = $1
            ORDER BY created_utc, item_id
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_err("fetch_invoice_items", e))?;

        Ok(items)
    }

    #[instrument(skip(self, payment), fields(invoice_id = %payment.invoice_id))]
    async fn insert_payment(&self, payment: &Payment) -> Result<(), StoreError> {
        let timer = STORE_OP_DURATION
            .with_label_values(&["insert_payment"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| map_err("insert_payment", e))?;

        // Row lock serializes concurrent payments against the same invoice.
        let total: Option<Decimal> = sqlx::query_scalar(
            "SELECT total_amount FROM invoices WHERE invoice_id = $1 FOR UPDATE",
        )
        .bind(payment.invoice_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_err("insert_payment", e))?;

        let total = total
            .ok_or_else(|| StoreError::NotFound(format!("invoice {}", payment.invoice_id)))?;

        let paid: Decimal = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM payments WHERE invoice_id = $1",
        )
        .bind(payment.invoice_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_err("insert_payment", e))?;

        let refunded: Decimal = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM refunds WHERE invoice_id = $1",
        )
        .bind(payment.invoice_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_err("insert_payment", e))?;

        let outstanding = total - (paid - refunded);
        if payment.amount > outstanding {
            return Err(StoreError::Conflict(format!(
                "payment {} exceeds outstanding balance {outstanding}",
                payment.amount
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO payments (
                payment_id, invoice_id, method, method_other, amount, receipt_number,
                reference, paid_at, recorded_by, notes, created_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(payment.payment_id)
        .bind(payment.invoice_id)
        .bind(&payment.method)
        .bind(&payment.method_other)
        .bind(payment.amount)
        .bind(&payment.receipt_number)
        .bind(&payment.reference)
        .bind(payment.paid_at)
        .bind(payment.recorded_by)
        .bind(&payment.notes)
        .bind(payment.created_utc)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_err("insert_payment", e))?;

        tx.commit().await.map_err(|e| map_err("insert_payment", e))?;

        timer.observe_duration();

        info!(payment_id = %payment.payment_id, amount = %payment.amount, "Payment inserted");

        Ok(())
    }

    async fn fetch_payment(&self, payment_id: Uuid) -> Result<Option<Payment>, StoreError> {
        let payment = sqlx::query_as::<_, Payment>(
            r#"
            SELECT payment_id, invoice_id, method, method_other, amount, receipt_number,
                reference, paid_at, recorded_by, notes, created_utc
            FROM payments
            WHERE payment_id = $1
            "#,
        )
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_err("fetch_payment", e))?;

        Ok(payment)
    }

    async fn fetch_payments(&self, invoice_id: Uuid) -> Result<Vec<Payment>, StoreError> {
        let payments = sqlx::query_as::<_, Payment>(
            r#"
            SELECT payment_id, invoice_id, method, method_other, amount, receipt_number,
                reference, paid_at, recorded_by, notes, created_utc
            FROM payments
            WHERE invoice_id = $1
            ORDER BY paid_at, payment_id
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_err("fetch_payments", e))?;

        Ok(payments)
    }

    async fn assign_receipt_number(
        &self,
        payment_id: Uuid,
        receipt_number: &str,
    ) -> Result<bool, StoreError> {
        // Conditional update keeps the assignment race-free: only the caller
        // that finds the column empty wins.
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET receipt_number = $2
            WHERE payment_id = $1 AND (receipt_number IS NULL OR receipt_number = '')
            "#,
        )
        .bind(payment_id)
        .bind(receipt_number)
        .execute(&self.pool)
        .await
        .map_err(|e| map_err("assign_receipt_number", e))?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, refund), fields(payment_id = %refund.payment_id))]
    async fn insert_refund(&self, refund: &Refund) -> Result<(), StoreError> {
        let timer = STORE_OP_DURATION
            .with_label_values(&["insert_refund"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| map_err("insert_refund", e))?;

        sqlx::query("SELECT invoice_id FROM invoices WHERE invoice_id = $1 FOR UPDATE")
            .bind(refund.invoice_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_err("insert_refund", e))?;

        let payment_amount: Option<Decimal> = sqlx::query_scalar(
            "SELECT amount FROM payments WHERE payment_id = $1",
        )
        .bind(refund.payment_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_err("insert_refund", e))?;

        let payment_amount = payment_amount
            .ok_or_else(|| StoreError::NotFound(format!("payment {}", refund.payment_id)))?;

        let already_refunded: Decimal = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM refunds WHERE payment_id = $1",
        )
        .bind(refund.payment_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_err("insert_refund", e))?;

        if refund.amount > payment_amount - already_refunded {
            return Err(StoreError::Conflict(format!(
                "refund {} exceeds refundable remainder {}",
                refund.amount,
                payment_amount - already_refunded
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO refunds (
                refund_id, payment_id, invoice_id, amount, refunded_at, refunded_by,
                reference, notes, created_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(refund.refund_id)
        .bind(refund.payment_id)
        .bind(refund.invoice_id)
        .bind(refund.amount)
        .bind(refund.refunded_at)
        .bind(refund.refunded_by)
        .bind(&refund.reference)
        .bind(&refund.notes)
        .bind(refund.created_utc)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_err("insert_refund", e))?;

        tx.commit().await.map_err(|e| map_err("insert_refund", e))?;

        timer.observe_duration();

        info!(refund_id = %refund.refund_id, amount = %refund.amount, "Refund inserted");

        Ok(())
    }

    async fn fetch_refunds_for_invoice(&self, invoice_id: Uuid) -> Result<Vec<Refund>, StoreError> {
        let refunds = sqlx::query_as::<_, Refund>(
            r#"
            SELECT refund_id, payment_id, invoice_id, amount, refunded_at, refunded_by,
                reference, notes, created_utc
            FROM refunds
            WHERE invoice_id = $1
            ORDER BY refunded_at, refund_id
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_err("fetch_refunds_for_invoice", e))?;

        Ok(refunds)
    }

    async fn fetch_refunds_for_payment(&self, payment_id: Uuid) -> Result<Vec<Refund>, StoreError> {
        let refunds = sqlx::query_as::<_, Refund>(
            r#"
            SELECT refund_id, payment_id, invoice_id, amount, refunded_at, refunded_by,
                reference, notes, created_utc
            FROM refunds
            WHERE payment_id = $1
            ORDER BY refunded_at, refund_id
            "#,
        )
        .bind(payment_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_err("fetch_refunds_for_payment", e))?;

        Ok(refunds)
    }

    async fn upsert_profit_record(&self, record: &ProfitRecord) -> Result<(), StoreError> {
        let timer = STORE_OP_DURATION
            .with_label_values(&["upsert_profit_record"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO profit_records (
                record_id, invoice_id, branch_id, currency,
                product_sales_total, product_cost_total, product_profit_total,
                service_sales_total, service_cost_total, service_profit_total,
                recorded_at, paid_at, trigger_payment_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (invoice_id) DO UPDATE SET
                branch_id = EXCLUDED.branch_id,
                currency = EXCLUDED.currency,
                product_sales_total = EXCLUDED.product_sales_total,
                product_cost_total = EXCLUDED.product_cost_total,
                product_profit_total = EXCLUDED.product_profit_total,
                service_sales_total = EXCLUDED.service_sales_total,
                service_cost_total = EXCLUDED.service_cost_total,
                service_profit_total = EXCLUDED.service_profit_total,
                recorded_at = EXCLUDED.recorded_at,
                paid_at = EXCLUDED.paid_at,
                trigger_payment_id = EXCLUDED.trigger_payment_id
            "#,
        )
        .bind(record.record_id)
        .bind(record.invoice_id)
        .bind(record.branch_id)
        .bind(&record.currency)
        .bind(record.product_sales_total)
        .bind(record.product_cost_total)
        .bind(record.product_profit_total)
        .bind(record.service_sales_total)
        .bind(record.service_cost_total)
        .bind(record.service_profit_total)
        .bind(record.recorded_at)
        .bind(record.paid_at)
        .bind(record.trigger_payment_id)
        .execute(&self.pool)
        .await
        .map_err(|e| map_err("upsert_profit_record", e))?;

        timer.observe_duration();

        Ok(())
    }

    async fn delete_profit_record(&self, invoice_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM profit_records WHERE invoice_id = $1")
            .bind(invoice_id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_err("delete_profit_record", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn fetch_profit_record(
        &self,
        invoice_id: Uuid,
    ) -> Result<Option<ProfitRecord>, StoreError> {
        let record = sqlx::query_as::<_, ProfitRecord>(
            r#"
            SELECT record_id, invoice_id, branch_id, currency,
                product_sales_total, product_cost_total, product_profit_total,
                service_sales_total, service_cost_total, service_profit_total,
                recorded_at, paid_at, trigger_payment_id
            FROM profit_records
            WHERE invoice_id = $1
            "#,
        )
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_err("fetch_profit_record", e))?;

        Ok(record)
    }

    async fn insert_product(&self, product: &Product) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO products (
                product_id, sku, name, unit_price, cost_price, stock_quantity,
                track_stock, is_active, created_utc, updated_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(product.product_id)
        .bind(&product.sku)
        .bind(&product.name)
        .bind(product.unit_price)
        .bind(product.cost_price)
        .bind(product.stock_quantity)
        .bind(product.track_stock)
        .bind(product.is_active)
        .bind(product.created_utc)
        .bind(product.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| map_err("insert_product", e))?;

        Ok(())
    }

    async fn fetch_product(&self, product_id: Uuid) -> Result<Option<Product>, StoreError> {
        let product = sqlx::query_as::<_, Product>(
            r#"
            SELECT product_id, sku, name, unit_price, cost_price, stock_quantity,
                track_stock, is_active, created_utc, updated_utc
            FROM products
            WHERE product_id = $1
            "#,
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_err("fetch_product", e))?;

        Ok(product)
    }

    async fn insert_service(&self, service: &Service) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO services (
                service_id, name, unit_price, service_charge, is_active, created_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(service.service_id)
        .bind(&service.name)
        .bind(service.unit_price)
        .bind(service.service_charge)
        .bind(service.is_active)
        .bind(service.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| map_err("insert_service", e))?;

        Ok(())
    }

    async fn fetch_service(&self, service_id: Uuid) -> Result<Option<Service>, StoreError> {
        let service = sqlx::query_as::<_, Service>(
            r#"
            SELECT service_id, name, unit_price, service_charge, is_active, created_utc
            FROM services
            WHERE service_id = $1
            "#,
        )
        .bind(service_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_err("fetch_service", e))?;

        Ok(service)
    }

    #[instrument(skip(self, plan), fields(invoice_id = %invoice_id, lines = plan.len()))]
    async fn apply_stock_deduction(
        &self,
        invoice_id: Uuid,
        reference: &str,
        plan: &[StockDeduction],
        deducted_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let timer = STORE_OP_DURATION
            .with_label_values(&["apply_stock_deduction"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_err("apply_stock_deduction", e))?;

        let stamped: Option<Option<DateTime<Utc>>> = sqlx::query_scalar(
            "SELECT stock_deducted_at FROM invoices WHERE invoice_id = $1 FOR UPDATE",
        )
        .bind(invoice_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_err("apply_stock_deduction", e))?;

        let stamped =
            stamped.ok_or_else(|| StoreError::NotFound(format!("invoice {invoice_id}")))?;

        let movements: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM stock_movements WHERE reference = $1 AND movement_type = 'out'",
        )
        .bind(reference)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_err("apply_stock_deduction", e))?;

        // Re-check the guard under the lock; the timestamp alone is not
        // enough (repair case: stamped earlier but no movements recorded).
        if stamped.is_some() && movements > 0 {
            return Ok(false);
        }

        for line in plan {
            sqlx::query(
                r#"
                UPDATE products
                SET stock_quantity = stock_quantity - $2, updated_utc = $3
                WHERE product_id = $1
                "#,
            )
            .bind(line.product_id)
            .bind(line.quantity)
            .bind(deducted_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_err("apply_stock_deduction", e))?;

            sqlx::query(
                r#"
                INSERT INTO stock_movements (
                    movement_id, product_id, movement_type, quantity, reference,
                    notes, occurred_at, created_utc
                )
                VALUES ($1, $2, 'out', $3, $4, NULL, $5, $5)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(line.product_id)
            .bind(line.quantity)
            .bind(reference)
            .bind(deducted_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_err("apply_stock_deduction", e))?;
        }

        sqlx::query(
            r#"
            UPDATE invoices
            SET stock_deducted_at = COALESCE(stock_deducted_at, $2), updated_utc = $2
            WHERE invoice_id = $1
            "#,
        )
        .bind(invoice_id)
        .bind(deducted_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_err("apply_stock_deduction", e))?;

        tx.commit()
            .await
            .map_err(|e| map_err("apply_stock_deduction", e))?;

        timer.observe_duration();

        info!(invoice_id = %invoice_id, reference = %reference, "Stock deducted");

        Ok(true)
    }

    async fn count_outbound_movements(&self, reference: &str) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM stock_movements WHERE reference = $1 AND movement_type = 'out'",
        )
        .bind(reference)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_err("count_outbound_movements", e))?;

        Ok(count)
    }

    async fn fetch_stock_movements(
        &self,
        product_id: Uuid,
    ) -> Result<Vec<StockMovement>, StoreError> {
        let movements = sqlx::query_as::<_, StockMovement>(
            r#"
            SELECT movement_id, product_id, movement_type, quantity, reference,
                notes, occurred_at, created_utc
            FROM stock_movements
            WHERE product_id = $1
            ORDER BY occurred_at, movement_id
            "#,
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_err("fetch_stock_movements", e))?;

        Ok(movements)
    }
}
