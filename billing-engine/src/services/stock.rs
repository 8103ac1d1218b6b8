//! Stock deduction synchronizer.

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, instrument};

use billing_core::BillingError;

use crate::models::{Invoice, InvoiceStatus, StockDeduction};
use crate::store::Store;

/// Deduct stock for a paid invoice, exactly once.
///
/// The guard is two-fold: the invoice's deduction timestamp AND the
/// existence of outbound movement rows referencing the invoice number. The
/// timestamp alone is not trusted (repair case: an earlier run stamped it
/// with no stock-tracked lines present, then lines were added). Returns
/// whether this call performed a deduction.
#[instrument(skip(store, invoice), fields(invoice_id = %invoice.invoice_id))]
pub async fn deduct_stock_if_needed<S: Store>(
    store: &S,
    invoice: &Invoice,
) -> Result<bool, BillingError> {
    if invoice.status() != InvoiceStatus::Paid {
        return Ok(false);
    }

    if invoice.stock_deducted_at.is_some() {
        let movements = store.count_outbound_movements(&invoice.number).await?;
        if movements > 0 {
            return Ok(false);
        }
    }

    let items = store.fetch_invoice_items(invoice.invoice_id).await?;
    let mut plan = Vec::new();
    for item in &items {
        let Some(product_id) = item.product_id else {
            continue;
        };
        if item.quantity <= Decimal::ZERO {
            continue;
        }
        let Some(product) = store.fetch_product(product_id).await? else {
            continue;
        };
        if !product.track_stock {
            continue;
        }
        plan.push(StockDeduction {
            product_id,
            quantity: item.quantity,
        });
    }

    // Nothing to deduct: leave the timestamp alone so a later run with real
    // stock lines still fires.
    if plan.is_empty() {
        return Ok(false);
    }

    let deducted = store
        .apply_stock_deduction(invoice.invoice_id, &invoice.number, &plan, Utc::now())
        .await?;

    if deducted {
        info!(
            invoice_id = %invoice.invoice_id,
            number = %invoice.number,
            lines = plan.len(),
            "Stock deducted for paid invoice"
        );
    }

    Ok(deducted)
}
