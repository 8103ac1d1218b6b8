//! Refund ledger.

use chrono::{Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{info, instrument};
use uuid::Uuid;

use billing_core::money::is_whole_unit;
use billing_core::BillingError;

use crate::models::{Invoice, RecordRefund, Refund};
use crate::services::invoice::refresh_status_from_payments;
use crate::services::metrics::REFUND_AMOUNT_TOTAL;
use crate::store::Store;

/// Refunds are accepted up to this many days after the payment was taken.
pub const REFUND_WINDOW_DAYS: i64 = 21;

/// Record a refund against a payment and rederive the invoice status.
///
/// The window check is evaluated against wall-clock time at creation; a
/// refund past the deadline fails with the exact deadline so callers can
/// surface it.
#[instrument(skip(store, input), fields(payment_id = %input.payment_id, amount = %input.amount))]
pub async fn record_refund<S: Store>(
    store: &S,
    input: RecordRefund,
) -> Result<(Refund, Invoice), BillingError> {
    if input.amount <= Decimal::ZERO {
        return Err(BillingError::validation("refund amount must be positive"));
    }
    if !is_whole_unit(input.amount) {
        return Err(BillingError::validation(
            "refund amount must be a whole currency unit",
        ));
    }

    let payment = store
        .fetch_payment(input.payment_id)
        .await?
        .ok_or_else(|| BillingError::not_found(format!("payment {}", input.payment_id)))?;

    if let Some(invoice_id) = input.invoice_id {
        if invoice_id != payment.invoice_id {
            return Err(BillingError::validation(format!(
                "refund targets invoice {invoice_id} but payment {} belongs to invoice {}",
                payment.payment_id, payment.invoice_id
            )));
        }
    }

    let deadline = payment.paid_at + Duration::days(REFUND_WINDOW_DAYS);
    if Utc::now() > deadline {
        return Err(BillingError::RefundWindowExpired { deadline });
    }

    let prior_refunds = store.fetch_refunds_for_payment(payment.payment_id).await?;
    let already_refunded: Decimal = prior_refunds.iter().map(|r| r.amount).sum();
    let refundable = payment.amount - already_refunded;
    if input.amount > refundable {
        return Err(BillingError::policy(format!(
            "refund of {} exceeds the refundable remainder of {refundable} on payment {}",
            input.amount, payment.payment_id
        )));
    }

    let now = Utc::now();
    let refund = Refund {
        refund_id: Uuid::new_v4(),
        payment_id: payment.payment_id,
        invoice_id: payment.invoice_id,
        amount: input.amount,
        refunded_at: now,
        refunded_by: input.refunded_by,
        reference: input.reference,
        notes: input.notes,
        created_utc: now,
    };

    // Re-checked under the invoice lock; a concurrent refund racing on the
    // same payment loses with a conflict.
    store.insert_refund(&refund).await?;

    let invoice = store
        .fetch_invoice(payment.invoice_id)
        .await?
        .ok_or_else(|| BillingError::not_found(format!("invoice {}", payment.invoice_id)))?;

    REFUND_AMOUNT_TOTAL
        .with_label_values(&[invoice.currency.as_str()])
        .inc_by(refund.amount.to_f64().unwrap_or(0.0));

    let invoice = refresh_status_from_payments(store, payment.invoice_id, None).await?;

    info!(
        refund_id = %refund.refund_id,
        payment_id = %payment.payment_id,
        invoice_status = %invoice.status,
        "Refund recorded"
    );

    Ok((refund, invoice))
}
