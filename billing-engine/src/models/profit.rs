//! Derived profit ledger.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Profit/cost breakdown for a fully paid invoice, one-to-one by invoice.
///
/// Created or replaced whenever an invoice becomes PAID; deleted when the
/// invoice is no longer PAID so aggregate reporting stays accurate after
/// refunds reverse the status.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProfitRecord {
    pub record_id: Uuid,
    pub invoice_id: Uuid,
    pub branch_id: Option<Uuid>,
    pub currency: String,

    pub product_sales_total: Decimal,
    pub product_cost_total: Decimal,
    pub product_profit_total: Decimal,

    pub service_sales_total: Decimal,
    pub service_cost_total: Decimal,
    pub service_profit_total: Decimal,

    pub recorded_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    /// Payment whose recording pushed the invoice to PAID, when known.
    pub trigger_payment_id: Option<Uuid>,
}
