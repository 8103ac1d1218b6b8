//! Catalog collaborators: products, services, stock movements.
//!
//! The engine only consumes prices, costs and stock deltas from these; it
//! never owns their wider lifecycle.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Stocked (or non-stocked) product.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Product {
    pub product_id: Uuid,
    pub sku: String,
    pub name: String,
    pub unit_price: Decimal,
    /// Purchase/production cost, snapshotted onto invoice lines.
    pub cost_price: Decimal,
    /// May go negative: a paid invoice is never blocked on stock.
    pub stock_quantity: Decimal,
    pub track_stock: bool,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Priced service.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Service {
    pub service_id: Uuid,
    pub name: String,
    pub unit_price: Decimal,
    /// Internal cost of delivering the service; read live for profit
    /// reconciliation.
    pub service_charge: Decimal,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
}

/// Stock movement direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    In,
    Out,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::In => "in",
            MovementType::Out => "out",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "out" => MovementType::Out,
            _ => MovementType::In,
        }
    }
}

/// Audit record for a stock mutation; outbound movements reference the
/// invoice number that caused them.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StockMovement {
    pub movement_id: Uuid,
    pub product_id: Uuid,
    pub movement_type: String,
    pub quantity: Decimal,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
}

impl StockMovement {
    pub fn movement_type(&self) -> MovementType {
        MovementType::from_string(&self.movement_type)
    }
}

/// One line of a stock deduction plan.
#[derive(Debug, Clone)]
pub struct StockDeduction {
    pub product_id: Uuid,
    pub quantity: Decimal,
}

/// Input for creating a product. SKU is assigned from the sequence
/// generator when absent.
#[derive(Debug, Clone)]
pub struct CreateProduct {
    pub sku: Option<String>,
    pub name: String,
    pub unit_price: Decimal,
    pub cost_price: Decimal,
    pub stock_quantity: Decimal,
    pub track_stock: bool,
}

/// Input for creating a service.
#[derive(Debug, Clone)]
pub struct CreateService {
    pub name: String,
    pub unit_price: Decimal,
    pub service_charge: Decimal,
}
