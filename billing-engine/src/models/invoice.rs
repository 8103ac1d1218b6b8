//! Invoice model.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Invoice status. CANCELLED is terminal with respect to payment-driven
/// derivation; PAID can revert to ISSUED when a refund reopens the balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Issued,
    Paid,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Issued => "issued",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "issued" => InvoiceStatus::Issued,
            "paid" => InvoiceStatus::Paid,
            "cancelled" => InvoiceStatus::Cancelled,
            _ => InvoiceStatus::Draft,
        }
    }
}

/// Invoice document.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub branch_id: Option<Uuid>,
    pub client_id: Uuid,
    /// At most one invoice per quotation.
    pub quotation_id: Option<Uuid>,
    pub number: String,
    pub status: String,
    pub currency: String,
    pub vat_rate: Decimal,
    pub issued_at: Option<NaiveDate>,
    pub due_at: Option<NaiveDate>,
    pub notes: Option<String>,
    pub prepared_by: Option<String>,
    pub signed_by: Option<String>,
    pub signed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<Uuid>,
    pub cancel_reason: Option<String>,
    /// Idempotence stamp for stock deduction; set once at least one line
    /// has been deducted.
    pub stock_deducted_at: Option<DateTime<Utc>>,
    pub subtotal_amount: Decimal,
    pub vat_amount: Decimal,
    pub total_amount: Decimal,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Invoice {
    pub fn status(&self) -> InvoiceStatus {
        InvoiceStatus::from_string(&self.status)
    }
}

/// Invoice line item. Unlike a quotation item it freezes `unit_cost` at
/// creation time so margin reporting survives later catalog price changes.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InvoiceItem {
    pub item_id: Uuid,
    pub invoice_id: Uuid,
    pub product_id: Option<Uuid>,
    pub service_id: Option<Uuid>,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    /// Frozen cost snapshot, captured when the line was created.
    pub unit_cost: Decimal,
    pub vat_exempt: bool,
    pub total_price: Decimal,
    pub created_utc: DateTime<Utc>,
}

/// Input for creating an invoice.
#[derive(Debug, Clone)]
pub struct CreateInvoice {
    pub branch_id: Option<Uuid>,
    pub client_id: Uuid,
    pub quotation_id: Option<Uuid>,
    pub currency: String,
    pub vat_rate: Decimal,
    pub due_at: Option<NaiveDate>,
    pub notes: Option<String>,
    pub prepared_by: Option<String>,
}

/// Input for adding a line item. When `unit_cost` is absent the engine
/// snapshots it from the catalog at creation time.
#[derive(Debug, Clone)]
pub struct CreateInvoiceItem {
    pub product_id: Option<Uuid>,
    pub service_id: Option<Uuid>,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub unit_cost: Option<Decimal>,
    pub vat_exempt: bool,
}

/// Input for updating a line item. The cost snapshot is never retaken on
/// update.
#[derive(Debug, Clone, Default)]
pub struct UpdateInvoiceItem {
    pub description: Option<String>,
    pub quantity: Option<Decimal>,
    pub unit_price: Option<Decimal>,
    pub vat_exempt: Option<bool>,
}
