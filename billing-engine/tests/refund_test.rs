mod common;

use chrono::{Duration, Utc};
use uuid::Uuid;

use billing_core::BillingError;
use billing_engine::models::{InvoiceStatus, RecordRefund};
use billing_engine::services::{payment, refund};
use billing_engine::store::Store;

use common::{dec, example_invoice, payment_input, store};

fn refund_input(payment_id: Uuid, amount: &str) -> RecordRefund {
    RecordRefund {
        payment_id,
        invoice_id: None,
        amount: dec(amount),
        refunded_by: None,
        reference: None,
        notes: None,
    }
}

#[tokio::test]
async fn refund_succeeds_inside_the_window() {
    let store = store();
    let inv = example_invoice(&store).await;

    let mut input = payment_input(inv.invoice_id, "295000");
    input.paid_at = Some(Utc::now() - Duration::days(20));
    let (pay, _) = payment::record_payment(&store, input).await.unwrap();

    let (r, inv) = refund::record_refund(&store, refund_input(pay.payment_id, "295000"))
        .await
        .unwrap();
    assert_eq!(r.amount, dec("295000"));
    assert_eq!(inv.status(), InvoiceStatus::Issued);
}

#[tokio::test]
async fn refund_fails_after_the_window_with_the_deadline() {
    let store = store();
    let inv = example_invoice(&store).await;

    let paid_at = Utc::now() - Duration::days(22);
    let mut input = payment_input(inv.invoice_id, "295000");
    input.paid_at = Some(paid_at);
    let (pay, _) = payment::record_payment(&store, input).await.unwrap();

    let err = refund::record_refund(&store, refund_input(pay.payment_id, "295000"))
        .await
        .unwrap_err();
    match err {
        BillingError::RefundWindowExpired { deadline } => {
            assert_eq!(deadline, paid_at + Duration::days(refund::REFUND_WINDOW_DAYS));
        }
        other => panic!("expected window-expired error, got {other}"),
    }
}

#[tokio::test]
async fn refunds_cannot_exceed_the_payment() {
    let store = store();
    let inv = example_invoice(&store).await;
    let (pay, _) = payment::record_payment(&store, payment_input(inv.invoice_id, "100000"))
        .await
        .unwrap();

    let err = refund::record_refund(&store, refund_input(pay.payment_id, "150000"))
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::Policy(_)));

    // Partial refunds accumulate against the same limit.
    refund::record_refund(&store, refund_input(pay.payment_id, "60000"))
        .await
        .unwrap();
    let err = refund::record_refund(&store, refund_input(pay.payment_id, "50000"))
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::Policy(_)));

    refund::record_refund(&store, refund_input(pay.payment_id, "40000"))
        .await
        .unwrap();
}

#[tokio::test]
async fn refund_rejects_non_positive_and_fractional_amounts() {
    let store = store();
    let inv = example_invoice(&store).await;
    let (pay, _) = payment::record_payment(&store, payment_input(inv.invoice_id, "100000"))
        .await
        .unwrap();

    for amount in ["0", "-1000", "500.25"] {
        let err = refund::record_refund(&store, refund_input(pay.payment_id, amount))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::Validation(_)), "amount {amount}");
    }
}

#[tokio::test]
async fn refund_invoice_link_must_match_the_payment() {
    let store = store();
    let inv = example_invoice(&store).await;
    let (pay, _) = payment::record_payment(&store, payment_input(inv.invoice_id, "100000"))
        .await
        .unwrap();

    let mut input = refund_input(pay.payment_id, "50000");
    input.invoice_id = Some(Uuid::new_v4());
    let err = refund::record_refund(&store, input).await.unwrap_err();
    assert!(matches!(err, BillingError::Validation(_)));

    let mut input = refund_input(pay.payment_id, "50000");
    input.invoice_id = Some(inv.invoice_id);
    refund::record_refund(&store, input).await.unwrap();
}

#[tokio::test]
async fn partial_refund_keeps_the_invoice_issued() {
    let store = store();
    let inv = example_invoice(&store).await;
    let (pay, inv) = payment::record_payment(&store, payment_input(inv.invoice_id, "295000"))
        .await
        .unwrap();
    assert_eq!(inv.status(), InvoiceStatus::Paid);

    let (_r, inv) = refund::record_refund(&store, refund_input(pay.payment_id, "95000"))
        .await
        .unwrap();
    assert_eq!(inv.status(), InvoiceStatus::Issued);

    let refunds = store.fetch_refunds_for_invoice(inv.invoice_id).await.unwrap();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].invoice_id, inv.invoice_id);
}
