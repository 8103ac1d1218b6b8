//! Repository-style storage API.
//!
//! All engine mutations go through [`Store`]. Operations the lifecycle rules
//! require to be atomic (sequence increments, payment/refund insertion under
//! the invoice lock, the stock-deduction guard, one-shot receipt assignment)
//! are composite methods so each backend can honor them with its own
//! locking; everything else is fine-grained with last-writer-wins semantics.

mod memory;
mod postgres;

pub use memory::MemStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use billing_core::BillingError;

use crate::models::{
    DocumentKind, Invoice, InvoiceItem, Payment, Product, ProfitRecord, Quotation, QuotationItem,
    Refund, Service, StockDeduction, StockMovement,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("row not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("contention: {0}")]
    Contention(String),

    #[error("backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl From<StoreError> for BillingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => BillingError::NotFound(msg),
            StoreError::Conflict(msg) => BillingError::Conflict(anyhow::anyhow!(msg)),
            StoreError::Contention(msg) => BillingError::Contention(anyhow::anyhow!(msg)),
            StoreError::Backend(err) => BillingError::Storage(err),
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    // -------------------------------------------------------------------------
    // Sequences
    // -------------------------------------------------------------------------

    /// Read-or-create the (kind, year) counter and increment it under a row
    /// lock in a single transaction. Returns the incremented value.
    async fn next_sequence(&self, kind: DocumentKind, year: i32) -> Result<i64, StoreError>;

    // -------------------------------------------------------------------------
    // Quotations
    // -------------------------------------------------------------------------

    async fn insert_quotation(&self, quotation: &Quotation) -> Result<(), StoreError>;
    async fn fetch_quotation(&self, quotation_id: Uuid) -> Result<Option<Quotation>, StoreError>;
    async fn update_quotation(&self, quotation: &Quotation) -> Result<(), StoreError>;

    async fn insert_quotation_item(&self, item: &QuotationItem) -> Result<(), StoreError>;
    async fn fetch_quotation_item(&self, item_id: Uuid)
        -> Result<Option<QuotationItem>, StoreError>;
    async fn update_quotation_item(&self, item: &QuotationItem) -> Result<(), StoreError>;
    async fn delete_quotation_item(&self, item_id: Uuid) -> Result<bool, StoreError>;
    async fn fetch_quotation_items(
        &self,
        quotation_id: Uuid,
    ) -> Result<Vec<QuotationItem>, StoreError>;

    // -------------------------------------------------------------------------
    // Invoices
    // -------------------------------------------------------------------------

    /// Fails with `Conflict` when an invoice already exists for the same
    /// quotation (unique one-to-one link).
    async fn insert_invoice(&self, invoice: &Invoice) -> Result<(), StoreError>;
    async fn fetch_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, StoreError>;
    async fn fetch_invoice_by_quotation(
        &self,
        quotation_id: Uuid,
    ) -> Result<Option<Invoice>, StoreError>;
    async fn update_invoice(&self, invoice: &Invoice) -> Result<(), StoreError>;

    async fn insert_invoice_item(&self, item: &InvoiceItem) -> Result<(), StoreError>;
    async fn fetch_invoice_item(&self, item_id: Uuid) -> Result<Option<InvoiceItem>, StoreError>;
    async fn update_invoice_item(&self, item: &InvoiceItem) -> Result<(), StoreError>;
    async fn delete_invoice_item(&self, item_id: Uuid) -> Result<bool, StoreError>;
    async fn fetch_invoice_items(&self, invoice_id: Uuid) -> Result<Vec<InvoiceItem>, StoreError>;

    // -------------------------------------------------------------------------
    // Payments and refunds
    // -------------------------------------------------------------------------

    /// Insert under an invoice row lock, re-checking that the amount does not
    /// exceed the outstanding balance so two concurrent payments cannot both
    /// pass the check. Returns `Conflict` for the losing racer.
    async fn insert_payment(&self, payment: &Payment) -> Result<(), StoreError>;
    async fn fetch_payment(&self, payment_id: Uuid) -> Result<Option<Payment>, StoreError>;
    async fn fetch_payments(&self, invoice_id: Uuid) -> Result<Vec<Payment>, StoreError>;

    /// Assign the receipt number only while the column is still empty.
    /// Returns whether this call performed the assignment.
    async fn assign_receipt_number(
        &self,
        payment_id: Uuid,
        receipt_number: &str,
    ) -> Result<bool, StoreError>;

    /// Insert under the invoice row lock, re-checking that the payment's
    /// refunds (including this one) do not exceed the payment amount.
    async fn insert_refund(&self, refund: &Refund) -> Result<(), StoreError>;
    async fn fetch_refunds_for_invoice(&self, invoice_id: Uuid) -> Result<Vec<Refund>, StoreError>;
    async fn fetch_refunds_for_payment(&self, payment_id: Uuid) -> Result<Vec<Refund>, StoreError>;

    // -------------------------------------------------------------------------
    // Profit records
    // -------------------------------------------------------------------------

    /// Insert or replace the record keyed by invoice.
    async fn upsert_profit_record(&self, record: &ProfitRecord) -> Result<(), StoreError>;
    async fn delete_profit_record(&self, invoice_id: Uuid) -> Result<bool, StoreError>;
    async fn fetch_profit_record(
        &self,
        invoice_id: Uuid,
    ) -> Result<Option<ProfitRecord>, StoreError>;

    // -------------------------------------------------------------------------
    // Catalog and stock
    // -------------------------------------------------------------------------

    async fn insert_product(&self, product: &Product) -> Result<(), StoreError>;
    async fn fetch_product(&self, product_id: Uuid) -> Result<Option<Product>, StoreError>;
    async fn insert_service(&self, service: &Service) -> Result<(), StoreError>;
    async fn fetch_service(&self, service_id: Uuid) -> Result<Option<Service>, StoreError>;

    /// Atomically, under the invoice row lock: re-check the deduction guard
    /// (timestamp set and outbound movements present), decrement each
    /// product's stock by the planned quantity (negative stock allowed),
    /// append outbound movements carrying `reference`, and stamp
    /// `stock_deducted_at`. Returns whether this call performed the
    /// deduction.
    async fn apply_stock_deduction(
        &self,
        invoice_id: Uuid,
        reference: &str,
        plan: &[StockDeduction],
        deducted_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Count outbound movements referencing an invoice number.
    async fn count_outbound_movements(&self, reference: &str) -> Result<i64, StoreError>;
    async fn fetch_stock_movements(
        &self,
        product_id: Uuid,
    ) -> Result<Vec<StockMovement>, StoreError>;
}
