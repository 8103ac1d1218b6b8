//! Payment ledger.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use billing_core::money::is_whole_unit;
use billing_core::BillingError;

use crate::models::{Invoice, InvoiceStatus, Payment, RecordPayment};
use crate::services::invoice::{outstanding, refresh_status_from_payments};
use crate::services::metrics::PAYMENT_AMOUNT_TOTAL;
use crate::store::Store;

/// Deterministic receipt identifier: payment date plus a slice of the row
/// identity, e.g. `RCPT-20250614-9F2C41AB`. Derived, so a re-run over the
/// same row always produces the same number.
pub fn receipt_number(payment_id: Uuid, paid_at: DateTime<Utc>) -> String {
    let row_tag: String = payment_id
        .simple()
        .to_string()
        .chars()
        .take(8)
        .collect::<String>()
        .to_uppercase();
    format!("RCPT-{}-{}", paid_at.format("%Y%m%d"), row_tag)
}

/// Record a payment against an invoice and rederive the invoice status.
#[instrument(skip(store, input), fields(invoice_id = %input.invoice_id, amount = %input.amount))]
pub async fn record_payment<S: Store>(
    store: &S,
    input: RecordPayment,
) -> Result<(Payment, Invoice), BillingError> {
    if input.amount <= Decimal::ZERO {
        return Err(BillingError::validation("payment amount must be positive"));
    }
    if !is_whole_unit(input.amount) {
        return Err(BillingError::validation(
            "payment amount must be a whole currency unit",
        ));
    }

    let invoice = store
        .fetch_invoice(input.invoice_id)
        .await?
        .ok_or_else(|| BillingError::not_found(format!("invoice {}", input.invoice_id)))?;
    if invoice.status() == InvoiceStatus::Cancelled {
        return Err(BillingError::policy(format!(
            "invoice {} is cancelled and cannot take payments",
            invoice.number
        )));
    }

    let payments = store.fetch_payments(invoice.invoice_id).await?;
    let refunds = store.fetch_refunds_for_invoice(invoice.invoice_id).await?;
    let paid: Decimal = payments.iter().map(|p| p.amount).sum();
    let refunded: Decimal = refunds.iter().map(|r| r.amount).sum();
    let open = outstanding(invoice.total_amount, paid, refunded);
    if input.amount > open {
        return Err(BillingError::validation(format!(
            "payment of {} exceeds outstanding balance of {open}",
            input.amount
        )));
    }

    let now = Utc::now();
    let payment = Payment {
        payment_id: Uuid::new_v4(),
        invoice_id: invoice.invoice_id,
        method: input.method.as_str().to_string(),
        method_other: input.method_other,
        amount: input.amount,
        receipt_number: None,
        reference: input.reference,
        paid_at: input.paid_at.unwrap_or(now),
        recorded_by: input.recorded_by,
        notes: input.notes,
        created_utc: now,
    };

    // The store re-checks the outstanding balance under the invoice lock;
    // a concurrent payment that slipped past the pre-check above loses here.
    store.insert_payment(&payment).await?;

    let receipt = receipt_number(payment.payment_id, payment.paid_at);
    let assigned = store
        .assign_receipt_number(payment.payment_id, &receipt)
        .await?;
    if !assigned {
        warn!(payment_id = %payment.payment_id, "Receipt number was already assigned");
    }

    PAYMENT_AMOUNT_TOTAL
        .with_label_values(&[invoice.currency.as_str()])
        .inc_by(payment.amount.to_f64().unwrap_or(0.0));

    let invoice =
        refresh_status_from_payments(store, invoice.invoice_id, Some(payment.payment_id)).await?;

    let payment = store
        .fetch_payment(payment.payment_id)
        .await?
        .ok_or_else(|| BillingError::not_found(format!("payment {}", payment.payment_id)))?;

    info!(
        payment_id = %payment.payment_id,
        receipt = %payment.receipt_number.as_deref().unwrap_or(""),
        invoice_status = %invoice.status,
        "Payment recorded"
    );

    Ok((payment, invoice))
}
