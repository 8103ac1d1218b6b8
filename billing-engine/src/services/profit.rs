//! Profit reconciliation.

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, instrument};
use uuid::Uuid;

use billing_core::money::quantize;
use billing_core::BillingError;

use crate::models::{Invoice, InvoiceItem, InvoiceStatus, ProfitRecord};
use crate::store::Store;

#[derive(Debug, Default, Clone, Copy)]
struct Bucket {
    sales: Decimal,
    cost: Decimal,
}

impl Bucket {
    fn add(&mut self, sales: Decimal, cost: Decimal) {
        self.sales += sales;
        self.cost += cost;
    }
}

/// Reconcile the profit record with the invoice's current status.
///
/// PAID invoices get their record created or replaced from current line
/// items; anything else has the record deleted so aggregate reporting never
/// counts an invoice a refund has since reopened. Product lines cost their
/// frozen snapshot; service lines cost the service's configured charge, read
/// live; free-text lines (including negative discount lines) land in the
/// service bucket with their snapshot cost.
#[instrument(skip(store, invoice), fields(invoice_id = %invoice.invoice_id))]
pub async fn sync_profit_record<S: Store>(
    store: &S,
    invoice: &Invoice,
    trigger_payment_id: Option<Uuid>,
) -> Result<(), BillingError> {
    if invoice.status() != InvoiceStatus::Paid {
        let deleted = store.delete_profit_record(invoice.invoice_id).await?;
        if deleted {
            info!(invoice_id = %invoice.invoice_id, "Profit record removed (invoice no longer paid)");
        }
        return Ok(());
    }

    let items = store.fetch_invoice_items(invoice.invoice_id).await?;

    let mut product = Bucket::default();
    let mut service = Bucket::default();

    for item in &items {
        let sales = item.total_price;
        if item.product_id.is_some() {
            product.add(sales, line_cost(item, item.unit_cost));
        } else if let Some(service_id) = item.service_id {
            let charge = store
                .fetch_service(service_id)
                .await?
                .map(|s| s.service_charge)
                .unwrap_or(Decimal::ZERO);
            service.add(sales, line_cost(item, charge));
        } else {
            service.add(sales, line_cost(item, item.unit_cost));
        }
    }

    let paid_at = store
        .fetch_payments(invoice.invoice_id)
        .await?
        .iter()
        .map(|p| p.paid_at)
        .max();

    let record = ProfitRecord {
        record_id: Uuid::new_v4(),
        invoice_id: invoice.invoice_id,
        branch_id: invoice.branch_id,
        currency: invoice.currency.clone(),
        product_sales_total: quantize(product.sales),
        product_cost_total: quantize(product.cost),
        product_profit_total: quantize(product.sales - product.cost),
        service_sales_total: quantize(service.sales),
        service_cost_total: quantize(service.cost),
        service_profit_total: quantize(service.sales - service.cost),
        recorded_at: Utc::now(),
        paid_at,
        trigger_payment_id,
    };

    store.upsert_profit_record(&record).await?;

    info!(
        invoice_id = %invoice.invoice_id,
        product_profit = %record.product_profit_total,
        service_profit = %record.service_profit_total,
        "Profit record reconciled"
    );

    Ok(())
}

fn line_cost(item: &InvoiceItem, unit_cost: Decimal) -> Decimal {
    quantize(item.quantity * unit_cost)
}
