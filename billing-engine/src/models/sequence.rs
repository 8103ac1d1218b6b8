//! Year-scoped document number sequences.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Document kinds that draw numbers from the sequence counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Quotation,
    Invoice,
    Bid,
    ProductSku,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Quotation => "quotation",
            DocumentKind::Invoice => "invoice",
            DocumentKind::Bid => "bid",
            DocumentKind::ProductSku => "product_sku",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "invoice" => DocumentKind::Invoice,
            "bid" => DocumentKind::Bid,
            "product_sku" => DocumentKind::ProductSku,
            _ => DocumentKind::Quotation,
        }
    }

    /// Prefix used in formatted document numbers.
    pub fn prefix(&self) -> &'static str {
        match self {
            DocumentKind::Quotation => "Q",
            DocumentKind::Invoice => "INV",
            DocumentKind::Bid => "BID",
            DocumentKind::ProductSku => "SKU",
        }
    }
}

/// Counter row keyed by (kind, year). Mutated only inside a lock-protected
/// increment; never decreases.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SequenceCounter {
    pub kind: String,
    pub year: i32,
    pub last_number: i64,
}
