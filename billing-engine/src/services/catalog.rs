//! Catalog operations consumed by the lifecycle engine.

use chrono::{Datelike, Utc};
use rust_decimal::Decimal;
use tracing::{info, instrument};
use uuid::Uuid;

use billing_core::BillingError;

use crate::models::{CreateProduct, CreateService, DocumentKind, Product, Service};
use crate::services::numbering::next_number;
use crate::store::Store;

/// Create a product, drawing a SKU from the sequence generator when the
/// caller did not supply one.
#[instrument(skip(store, input), fields(name = %input.name))]
pub async fn create_product<S: Store>(
    store: &S,
    input: CreateProduct,
) -> Result<Product, BillingError> {
    if input.unit_price < Decimal::ZERO || input.cost_price < Decimal::ZERO {
        return Err(BillingError::validation("prices cannot be negative"));
    }

    let now = Utc::now();
    let sku = match input.sku {
        Some(sku) if !sku.trim().is_empty() => sku,
        _ => next_number(store, DocumentKind::ProductSku, now.year()).await?,
    };

    let product = Product {
        product_id: Uuid::new_v4(),
        sku,
        name: input.name,
        unit_price: input.unit_price,
        cost_price: input.cost_price,
        stock_quantity: input.stock_quantity,
        track_stock: input.track_stock,
        is_active: true,
        created_utc: now,
        updated_utc: now,
    };

    store.insert_product(&product).await?;

    info!(product_id = %product.product_id, sku = %product.sku, "Product created");

    Ok(product)
}

#[instrument(skip(store, input), fields(name = %input.name))]
pub async fn create_service<S: Store>(
    store: &S,
    input: CreateService,
) -> Result<Service, BillingError> {
    if input.unit_price < Decimal::ZERO || input.service_charge < Decimal::ZERO {
        return Err(BillingError::validation("prices cannot be negative"));
    }

    let service = Service {
        service_id: Uuid::new_v4(),
        name: input.name,
        unit_price: input.unit_price,
        service_charge: input.service_charge,
        is_active: true,
        created_utc: Utc::now(),
    };

    store.insert_service(&service).await?;

    info!(service_id = %service.service_id, "Service created");

    Ok(service)
}
