//! Invoice engine.
//!
//! Status is never edited directly by payment flows; it is derived from the
//! payment/refund ledgers every time one of them (or a line item) changes.
//! The derivation is convergent: it recomputes from current sums rather than
//! stepping from the previous status, so replays and races settle on the
//! same answer.

use chrono::{Datelike, Utc};
use rust_decimal::Decimal;
use tracing::{error, info, instrument};
use uuid::Uuid;

use billing_core::money::{balance_cleared, quantize};
use billing_core::BillingError;

use crate::models::valuation::line_total;
use crate::models::{
    CreateInvoice, CreateInvoiceItem, DocumentKind, Invoice, InvoiceItem, InvoiceStatus,
    UpdateInvoiceItem,
};
use crate::services::metrics::{DOCUMENTS_TOTAL, ERRORS_TOTAL, INVOICE_STATUS_TOTAL};
use crate::services::numbering::next_number;
use crate::services::{profit, stock};
use crate::store::Store;

/// Derive the invoice status from ledger sums.
///
/// `ever_issued` is true when the invoice carries an issue date;
/// `has_ledger_rows` when any payment or refund row exists (even fully
/// refunded ones keep an invoice ISSUED rather than letting it fall back to
/// DRAFT).
pub fn derive_status(
    current: InvoiceStatus,
    total: Decimal,
    paid: Decimal,
    refunded: Decimal,
    ever_issued: bool,
    has_ledger_rows: bool,
) -> InvoiceStatus {
    if current == InvoiceStatus::Cancelled {
        return InvoiceStatus::Cancelled;
    }

    let net_paid = paid - refunded;
    let balance = total - net_paid;

    if balance_cleared(balance) {
        InvoiceStatus::Paid
    } else if net_paid > Decimal::ZERO || ever_issued || has_ledger_rows {
        InvoiceStatus::Issued
    } else {
        InvoiceStatus::Draft
    }
}

/// Outstanding balance, floored at zero.
pub fn outstanding(total: Decimal, paid: Decimal, refunded: Decimal) -> Decimal {
    let balance = total - (paid - refunded);
    if balance_cleared(balance) {
        Decimal::ZERO
    } else {
        balance
    }
}

#[instrument(skip(store, input), fields(client_id = %input.client_id))]
pub async fn create_invoice<S: Store>(
    store: &S,
    input: CreateInvoice,
) -> Result<Invoice, BillingError> {
    if input.vat_rate < Decimal::ZERO {
        return Err(BillingError::validation("VAT rate cannot be negative"));
    }

    let now = Utc::now();
    let number = next_number(store, DocumentKind::Invoice, now.year()).await?;

    let invoice = Invoice {
        invoice_id: Uuid::new_v4(),
        branch_id: input.branch_id,
        client_id: input.client_id,
        quotation_id: input.quotation_id,
        number,
        status: InvoiceStatus::Draft.as_str().to_string(),
        currency: input.currency,
        vat_rate: input.vat_rate,
        issued_at: None,
        due_at: input.due_at,
        notes: input.notes,
        prepared_by: input.prepared_by,
        signed_by: None,
        signed_at: None,
        cancelled_at: None,
        cancelled_by: None,
        cancel_reason: None,
        stock_deducted_at: None,
        subtotal_amount: Decimal::ZERO,
        vat_amount: Decimal::ZERO,
        total_amount: Decimal::ZERO,
        created_utc: now,
        updated_utc: now,
    };

    store.insert_invoice(&invoice).await?;

    DOCUMENTS_TOTAL.with_label_values(&["invoice"]).inc();
    info!(invoice_id = %invoice.invoice_id, number = %invoice.number, "Invoice created");

    Ok(invoice)
}

async fn fetch_required<S: Store>(store: &S, invoice_id: Uuid) -> Result<Invoice, BillingError> {
    store
        .fetch_invoice(invoice_id)
        .await?
        .ok_or_else(|| BillingError::not_found(format!("invoice {invoice_id}")))
}

fn ensure_editable(invoice: &Invoice) -> Result<(), BillingError> {
    if invoice.status() == InvoiceStatus::Cancelled {
        return Err(BillingError::policy(format!(
            "invoice {} is cancelled and can no longer be edited",
            invoice.number
        )));
    }
    Ok(())
}

/// Recompute and persist derived totals from current line items.
///
/// There is no document-level discount column on invoices: discounts arrive
/// as negative lines, which also pull the taxable base down.
pub async fn recalculate_amounts<S: Store>(
    store: &S,
    invoice_id: Uuid,
) -> Result<Invoice, BillingError> {
    let mut invoice = fetch_required(store, invoice_id).await?;
    let items = store.fetch_invoice_items(invoice_id).await?;

    let subtotal = quantize(items.iter().map(|item| item.total_price).sum());
    let taxable: Decimal = items
        .iter()
        .filter(|item| !item.vat_exempt)
        .map(|item| item.total_price)
        .sum();
    let vat = quantize(taxable.max(Decimal::ZERO) * invoice.vat_rate);

    invoice.subtotal_amount = subtotal;
    invoice.vat_amount = vat;
    invoice.total_amount = quantize(subtotal + vat);
    invoice.updated_utc = Utc::now();

    store.update_invoice(&invoice).await?;

    Ok(invoice)
}

#[instrument(skip(store, input), fields(invoice_id = %invoice_id))]
pub async fn add_item<S: Store>(
    store: &S,
    invoice_id: Uuid,
    input: CreateInvoiceItem,
) -> Result<InvoiceItem, BillingError> {
    let invoice = fetch_required(store, invoice_id).await?;
    ensure_editable(&invoice)?;

    if input.product_id.is_some() && input.service_id.is_some() {
        return Err(BillingError::validation(
            "line item cannot reference both a product and a service",
        ));
    }
    if input.quantity <= Decimal::ZERO {
        return Err(BillingError::validation("quantity must be positive"));
    }

    // Freeze the cost at creation time; later catalog price changes must not
    // rewrite historical margins.
    let unit_cost = match (input.unit_cost, input.product_id) {
        (Some(cost), _) => cost,
        (None, Some(product_id)) => store
            .fetch_product(product_id)
            .await?
            .map(|p| p.cost_price)
            .unwrap_or(Decimal::ZERO),
        (None, None) => Decimal::ZERO,
    };

    let item = InvoiceItem {
        item_id: Uuid::new_v4(),
        invoice_id,
        product_id: input.product_id,
        service_id: input.service_id,
        description: input.description,
        quantity: input.quantity,
        unit_price: input.unit_price,
        unit_cost,
        vat_exempt: input.vat_exempt,
        total_price: line_total(input.quantity, input.unit_price),
        created_utc: Utc::now(),
    };

    store.insert_invoice_item(&item).await?;
    recalculate_amounts(store, invoice_id).await?;
    refresh_status_from_payments(store, invoice_id, None).await?;

    Ok(item)
}

#[instrument(skip(store, changes), fields(item_id = %item_id))]
pub async fn update_item<S: Store>(
    store: &S,
    item_id: Uuid,
    changes: UpdateInvoiceItem,
) -> Result<InvoiceItem, BillingError> {
    let mut item = store
        .fetch_invoice_item(item_id)
        .await?
        .ok_or_else(|| BillingError::not_found(format!("invoice item {item_id}")))?;
    let invoice = fetch_required(store, item.invoice_id).await?;
    ensure_editable(&invoice)?;

    if let Some(description) = changes.description {
        item.description = description;
    }
    if let Some(quantity) = changes.quantity {
        if quantity <= Decimal::ZERO {
            return Err(BillingError::validation("quantity must be positive"));
        }
        item.quantity = quantity;
    }
    if let Some(unit_price) = changes.unit_price {
        item.unit_price = unit_price;
    }
    if let Some(vat_exempt) = changes.vat_exempt {
        item.vat_exempt = vat_exempt;
    }
    item.total_price = line_total(item.quantity, item.unit_price);

    store.update_invoice_item(&item).await?;
    recalculate_amounts(store, item.invoice_id).await?;
    refresh_status_from_payments(store, item.invoice_id, None).await?;

    Ok(item)
}

#[instrument(skip(store), fields(item_id = %item_id))]
pub async fn delete_item<S: Store>(store: &S, item_id: Uuid) -> Result<(), BillingError> {
    let item = store
        .fetch_invoice_item(item_id)
        .await?
        .ok_or_else(|| BillingError::not_found(format!("invoice item {item_id}")))?;
    let invoice = fetch_required(store, item.invoice_id).await?;
    ensure_editable(&invoice)?;

    store.delete_invoice_item(item_id).await?;
    recalculate_amounts(store, item.invoice_id).await?;
    refresh_status_from_payments(store, item.invoice_id, None).await?;

    Ok(())
}

/// Move a draft invoice to ISSUED, stamping the issue date.
pub async fn issue<S: Store>(store: &S, invoice_id: Uuid) -> Result<Invoice, BillingError> {
    let mut invoice = fetch_required(store, invoice_id).await?;
    if invoice.status() != InvoiceStatus::Draft {
        return Err(BillingError::policy(format!(
            "invoice {} is {} and cannot be issued",
            invoice.number, invoice.status
        )));
    }

    let now = Utc::now();
    invoice.status = InvoiceStatus::Issued.as_str().to_string();
    invoice.issued_at = Some(now.date_naive());
    invoice.updated_utc = now;
    store.update_invoice(&invoice).await?;

    INVOICE_STATUS_TOTAL.with_label_values(&["issued"]).inc();
    info!(invoice_id = %invoice_id, number = %invoice.number, "Invoice issued");

    Ok(invoice)
}

/// Record the approval signature on an invoice.
///
/// One-shot: a signed invoice keeps its original signer and timestamp.
#[instrument(skip(store, signed_by), fields(invoice_id = %invoice_id))]
pub async fn sign<S: Store>(
    store: &S,
    invoice_id: Uuid,
    signed_by: String,
) -> Result<Invoice, BillingError> {
    let signed_by = signed_by.trim().to_string();
    if signed_by.is_empty() {
        return Err(BillingError::validation("signer name cannot be empty"));
    }

    let mut invoice = fetch_required(store, invoice_id).await?;
    ensure_editable(&invoice)?;

    if invoice.signed_at.is_some() {
        return Err(BillingError::policy(format!(
            "invoice {} is already signed",
            invoice.number
        )));
    }

    let now = Utc::now();
    invoice.signed_by = Some(signed_by);
    invoice.signed_at = Some(now);
    invoice.updated_utc = now;
    store.update_invoice(&invoice).await?;

    info!(invoice_id = %invoice_id, number = %invoice.number, "Invoice signed");

    Ok(invoice)
}

/// Rederive the invoice status from the payment/refund ledgers, then run the
/// paid-state side effects (stock deduction, profit reconciliation).
///
/// Side-effect failures are logged and swallowed: the ledger mutation that
/// triggered the refresh must stay durable even when stock or profit sync
/// raises.
#[instrument(skip(store), fields(invoice_id = %invoice_id))]
pub async fn refresh_status_from_payments<S: Store>(
    store: &S,
    invoice_id: Uuid,
    trigger_payment_id: Option<Uuid>,
) -> Result<Invoice, BillingError> {
    let mut invoice = fetch_required(store, invoice_id).await?;
    if invoice.status() == InvoiceStatus::Cancelled {
        return Ok(invoice);
    }

    let payments = store.fetch_payments(invoice_id).await?;
    let refunds = store.fetch_refunds_for_invoice(invoice_id).await?;

    let paid: Decimal = payments.iter().map(|p| p.amount).sum();
    let refunded: Decimal = refunds.iter().map(|r| r.amount).sum();
    let has_ledger_rows = !payments.is_empty() || !refunds.is_empty();

    let next = derive_status(
        invoice.status(),
        invoice.total_amount,
        paid,
        refunded,
        invoice.issued_at.is_some(),
        has_ledger_rows,
    );

    let now = Utc::now();
    let mut dirty = false;

    if next != invoice.status() {
        info!(
            invoice_id = %invoice_id,
            from = %invoice.status,
            to = next.as_str(),
            "Invoice status derived"
        );
        invoice.status = next.as_str().to_string();
        INVOICE_STATUS_TOTAL.with_label_values(&[next.as_str()]).inc();
        dirty = true;
    }

    if matches!(next, InvoiceStatus::Issued | InvoiceStatus::Paid) && invoice.issued_at.is_none() {
        invoice.issued_at = Some(now.date_naive());
        dirty = true;
    }

    if dirty {
        invoice.updated_utc = now;
        store.update_invoice(&invoice).await?;
    }

    match stock::deduct_stock_if_needed(store, &invoice).await {
        Ok(true) => {
            // Pick up the deduction stamp so the returned snapshot is current.
            if let Some(refreshed) = store.fetch_invoice(invoice_id).await? {
                invoice = refreshed;
            }
        }
        Ok(false) => {}
        Err(err) => {
            error!(invoice_id = %invoice_id, error = %err, "Stock deduction failed after status refresh");
            ERRORS_TOTAL.with_label_values(&["stock_deduction"]).inc();
        }
    }

    if let Err(err) = profit::sync_profit_record(store, &invoice, trigger_payment_id).await {
        error!(invoice_id = %invoice_id, error = %err, "Profit reconciliation failed after status refresh");
        ERRORS_TOTAL.with_label_values(&["profit_sync"]).inc();
    }

    Ok(invoice)
}

/// Cancel an invoice. Refused while any net payment remains on the books.
#[instrument(skip(store, reason), fields(invoice_id = %invoice_id))]
pub async fn cancel<S: Store>(
    store: &S,
    invoice_id: Uuid,
    cancelled_by: Option<Uuid>,
    reason: Option<String>,
) -> Result<Invoice, BillingError> {
    let mut invoice = fetch_required(store, invoice_id).await?;

    match invoice.status() {
        InvoiceStatus::Cancelled => {
            return Err(BillingError::policy(format!(
                "invoice {} is already cancelled",
                invoice.number
            )))
        }
        InvoiceStatus::Paid => {
            return Err(BillingError::policy(format!(
                "invoice {} is paid; reverse its payments before cancelling",
                invoice.number
            )))
        }
        InvoiceStatus::Draft | InvoiceStatus::Issued => {}
    }

    let payments = store.fetch_payments(invoice_id).await?;
    let refunds = store.fetch_refunds_for_invoice(invoice_id).await?;
    let paid: Decimal = payments.iter().map(|p| p.amount).sum();
    let refunded: Decimal = refunds.iter().map(|r| r.amount).sum();
    if paid - refunded != Decimal::ZERO {
        return Err(BillingError::policy(format!(
            "invoice {} still carries a net payment of {}; reverse it before cancelling",
            invoice.number,
            paid - refunded
        )));
    }

    let reason = reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
    if invoice.status() != InvoiceStatus::Draft && reason.is_none() {
        return Err(BillingError::validation(
            "a cancellation reason is required for issued invoices",
        ));
    }

    let now = Utc::now();
    invoice.status = InvoiceStatus::Cancelled.as_str().to_string();
    invoice.cancelled_at = Some(now);
    invoice.cancelled_by = cancelled_by;
    invoice.cancel_reason = reason;
    invoice.updated_utc = now;
    store.update_invoice(&invoice).await?;

    INVOICE_STATUS_TOTAL.with_label_values(&["cancelled"]).inc();
    info!(invoice_id = %invoice_id, number = %invoice.number, "Invoice cancelled");

    Ok(invoice)
}
