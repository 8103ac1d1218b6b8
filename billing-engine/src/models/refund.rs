//! Refund model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Refund against a specific payment. The invoice link is denormalized so
/// invoice-level sums never join through payments.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Refund {
    pub refund_id: Uuid,
    pub payment_id: Uuid,
    pub invoice_id: Uuid,
    pub amount: Decimal,
    pub refunded_at: DateTime<Utc>,
    pub refunded_by: Option<Uuid>,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub created_utc: DateTime<Utc>,
}

/// Input for recording a refund.
#[derive(Debug, Clone)]
pub struct RecordRefund {
    pub payment_id: Uuid,
    /// When supplied it must match the payment's invoice.
    pub invoice_id: Option<Uuid>,
    pub amount: Decimal,
    pub refunded_by: Option<Uuid>,
    pub reference: Option<String>,
    pub notes: Option<String>,
}
