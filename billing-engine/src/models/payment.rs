//! Payment model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Payment method. `Other` carries a free-text label override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Bank,
    MobileMoney,
    Other,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Bank => "bank",
            PaymentMethod::MobileMoney => "mobile_money",
            PaymentMethod::Other => "other",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "cash" => PaymentMethod::Cash,
            "bank" => PaymentMethod::Bank,
            "mobile_money" => PaymentMethod::MobileMoney,
            _ => PaymentMethod::Other,
        }
    }

    pub fn display(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "Cash",
            PaymentMethod::Bank => "Bank",
            PaymentMethod::MobileMoney => "Mobile Money",
            PaymentMethod::Other => "Other",
        }
    }
}

/// Payment against an invoice. Amounts are whole currency units only.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub payment_id: Uuid,
    pub invoice_id: Uuid,
    pub method: String,
    pub method_other: Option<String>,
    pub amount: Decimal,
    /// Globally unique, derived from payment date + row identity once the
    /// row exists; assigned idempotently if missing.
    pub receipt_number: Option<String>,
    pub reference: Option<String>,
    pub paid_at: DateTime<Utc>,
    pub recorded_by: Option<Uuid>,
    pub notes: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl Payment {
    pub fn method(&self) -> PaymentMethod {
        PaymentMethod::from_string(&self.method)
    }

    /// Human-readable method label; the free-text override wins for `other`.
    pub fn method_label(&self) -> String {
        match self.method() {
            PaymentMethod::Other => match self.method_other.as_deref().map(str::trim) {
                Some(label) if !label.is_empty() => label.to_string(),
                _ => "Other".to_string(),
            },
            method => method.display().to_string(),
        }
    }
}

/// Input for recording a payment.
#[derive(Debug, Clone)]
pub struct RecordPayment {
    pub invoice_id: Uuid,
    pub method: PaymentMethod,
    pub method_other: Option<String>,
    pub amount: Decimal,
    /// Defaults to now when absent.
    pub paid_at: Option<DateTime<Utc>>,
    pub recorded_by: Option<Uuid>,
    pub reference: Option<String>,
    pub notes: Option<String>,
}
