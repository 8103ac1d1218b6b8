//! Quotation model.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Quotation status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotationStatus {
    Draft,
    Sent,
    Accepted,
    Rejected,
    Converted,
    Expired,
    Cancelled,
}

impl QuotationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotationStatus::Draft => "draft",
            QuotationStatus::Sent => "sent",
            QuotationStatus::Accepted => "accepted",
            QuotationStatus::Rejected => "rejected",
            QuotationStatus::Converted => "converted",
            QuotationStatus::Expired => "expired",
            QuotationStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "sent" => QuotationStatus::Sent,
            "accepted" => QuotationStatus::Accepted,
            "rejected" => QuotationStatus::Rejected,
            "converted" => QuotationStatus::Converted,
            "expired" => QuotationStatus::Expired,
            "cancelled" => QuotationStatus::Cancelled,
            _ => QuotationStatus::Draft,
        }
    }

    /// Terminal for edits: line items become read-only.
    pub fn is_locked(&self) -> bool {
        matches!(
            self,
            QuotationStatus::Converted | QuotationStatus::Expired | QuotationStatus::Cancelled
        )
    }
}

/// Quotation document. Derived totals are persisted and recomputed on every
/// line change so list views never recompute them.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Quotation {
    pub quotation_id: Uuid,
    /// Opaque multi-branch tag; the engine never interprets it.
    pub branch_id: Option<Uuid>,
    pub client_id: Uuid,
    pub number: String,
    pub status: String,
    pub currency: String,
    pub vat_enabled: bool,
    pub vat_rate: Decimal,
    pub discount_amount: Decimal,
    pub subtotal_amount: Decimal,
    pub vat_amount: Decimal,
    pub total_amount: Decimal,
    pub valid_until: Option<NaiveDate>,
    pub notes: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<Uuid>,
    pub cancel_reason: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Quotation {
    pub fn status(&self) -> QuotationStatus {
        QuotationStatus::from_string(&self.status)
    }

    pub fn is_expired(&self, today: NaiveDate) -> bool {
        match self.valid_until {
            Some(valid_until) => valid_until < today,
            None => false,
        }
    }
}

/// Quotation line item. Either a priced catalog reference (product or
/// service, mutually exclusive) or a free-text description.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QuotationItem {
    pub item_id: Uuid,
    pub quotation_id: Uuid,
    pub product_id: Option<Uuid>,
    pub service_id: Option<Uuid>,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub vat_exempt: bool,
    pub total_price: Decimal,
    pub created_utc: DateTime<Utc>,
}

/// Input for creating a quotation.
#[derive(Debug, Clone)]
pub struct CreateQuotation {
    pub branch_id: Option<Uuid>,
    pub client_id: Uuid,
    pub currency: String,
    pub vat_enabled: bool,
    pub vat_rate: Decimal,
    pub discount_amount: Decimal,
    pub valid_until: Option<NaiveDate>,
    pub notes: Option<String>,
}

/// Input for adding a line item.
#[derive(Debug, Clone)]
pub struct CreateQuotationItem {
    pub product_id: Option<Uuid>,
    pub service_id: Option<Uuid>,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub vat_exempt: bool,
}

/// Input for updating a line item.
#[derive(Debug, Clone, Default)]
pub struct UpdateQuotationItem {
    pub description: Option<String>,
    pub quantity: Option<Decimal>,
    pub unit_price: Option<Decimal>,
    pub vat_exempt: Option<bool>,
}
