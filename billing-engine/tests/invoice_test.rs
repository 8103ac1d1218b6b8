mod common;

use rust_decimal::Decimal;
use uuid::Uuid;

use billing_core::BillingError;
use billing_engine::models::{InvoiceStatus, UpdateInvoiceItem};
use billing_engine::services::{invoice, payment, refund};
use billing_engine::store::Store;

use common::{dec, example_invoice, free_line, invoice_input, payment_input, store};

#[tokio::test]
async fn totals_follow_the_documented_example() {
    let store = store();
    let inv = example_invoice(&store).await;

    assert_eq!(inv.subtotal_amount, dec("250000.00"));
    assert_eq!(inv.vat_amount, dec("45000.00"));
    assert_eq!(inv.total_amount, dec("295000.00"));
}

#[tokio::test]
async fn full_payment_marks_paid_and_full_refund_reverts() {
    let store = store();
    let inv = example_invoice(&store).await;

    let (pay, inv) = payment::record_payment(&store, payment_input(inv.invoice_id, "295000"))
        .await
        .unwrap();
    assert_eq!(inv.status(), InvoiceStatus::Paid);
    assert!(store
        .fetch_profit_record(inv.invoice_id)
        .await
        .unwrap()
        .is_some());

    let (_refund, inv) = refund::record_refund(
        &store,
        billing_engine::models::RecordRefund {
            payment_id: pay.payment_id,
            invoice_id: None,
            amount: dec("295000"),
            refunded_by: None,
            reference: None,
            notes: None,
        },
    )
    .await
    .unwrap();

    assert_eq!(inv.status(), InvoiceStatus::Issued);
    assert!(store
        .fetch_profit_record(inv.invoice_id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn partial_payment_issues_the_invoice() {
    let store = store();
    let inv = example_invoice(&store).await;
    assert_eq!(inv.status(), InvoiceStatus::Draft);
    assert!(inv.issued_at.is_none());

    let (_pay, inv) = payment::record_payment(&store, payment_input(inv.invoice_id, "100000"))
        .await
        .unwrap();

    assert_eq!(inv.status(), InvoiceStatus::Issued);
    assert!(inv.issued_at.is_some());
}

#[tokio::test]
async fn line_edits_rederive_totals_and_status() {
    let store = store();
    let inv = example_invoice(&store).await;

    payment::record_payment(&store, payment_input(inv.invoice_id, "295000"))
        .await
        .unwrap();

    // Growing the invoice reopens the balance; status falls back to issued.
    invoice::add_item(&store, inv.invoice_id, free_line("Extra", "1", "100000"))
        .await
        .unwrap();
    let inv = store.fetch_invoice(inv.invoice_id).await.unwrap().unwrap();
    assert_eq!(inv.status(), InvoiceStatus::Issued);
    assert_eq!(inv.total_amount, dec("413000.00"));
}

#[tokio::test]
async fn tolerance_band_clears_residual_balances() {
    let store = store();
    let inv = invoice::create_invoice(&store, invoice_input(Uuid::new_v4()))
        .await
        .unwrap();
    let mut line = free_line("Oddly priced", "1", "100000.05");
    line.vat_exempt = true;
    invoice::add_item(&store, inv.invoice_id, line).await.unwrap();

    let (_pay, inv) = payment::record_payment(&store, payment_input(inv.invoice_id, "100000"))
        .await
        .unwrap();
    assert_eq!(inv.status(), InvoiceStatus::Paid);
}

#[tokio::test]
async fn manual_issue_stamps_the_issue_date() {
    let store = store();
    let inv = example_invoice(&store).await;

    let inv = invoice::issue(&store, inv.invoice_id).await.unwrap();
    assert_eq!(inv.status(), InvoiceStatus::Issued);
    assert!(inv.issued_at.is_some());

    let err = invoice::issue(&store, inv.invoice_id).await.unwrap_err();
    assert!(matches!(err, BillingError::Policy(_)));
}

#[tokio::test]
async fn cancelling_a_paid_invoice_is_refused() {
    let store = store();
    let inv = example_invoice(&store).await;
    payment::record_payment(&store, payment_input(inv.invoice_id, "295000"))
        .await
        .unwrap();

    let err = invoice::cancel(&store, inv.invoice_id, None, Some("nope".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::Policy(_)));
}

#[tokio::test]
async fn cancelling_with_net_payment_on_the_books_is_refused() {
    let store = store();
    let inv = example_invoice(&store).await;
    payment::record_payment(&store, payment_input(inv.invoice_id, "50000"))
        .await
        .unwrap();

    let err = invoice::cancel(&store, inv.invoice_id, None, Some("customer left".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::Policy(_)));
}

#[tokio::test]
async fn issued_invoices_need_a_cancellation_reason() {
    let store = store();
    let inv = example_invoice(&store).await;
    invoice::issue(&store, inv.invoice_id).await.unwrap();

    let err = invoice::cancel(&store, inv.invoice_id, None, None).await.unwrap_err();
    assert!(matches!(err, BillingError::Validation(_)));

    let inv = invoice::cancel(&store, inv.invoice_id, Some(Uuid::new_v4()), Some("mistake".into()))
        .await
        .unwrap();
    assert_eq!(inv.status(), InvoiceStatus::Cancelled);
    assert!(inv.cancelled_at.is_some());
    assert_eq!(inv.cancel_reason.as_deref(), Some("mistake"));
}

#[tokio::test]
async fn draft_invoices_cancel_without_a_reason() {
    let store = store();
    let inv = example_invoice(&store).await;

    let inv = invoice::cancel(&store, inv.invoice_id, None, None).await.unwrap();
    assert_eq!(inv.status(), InvoiceStatus::Cancelled);
}

#[tokio::test]
async fn cancelled_invoices_ignore_ledger_derivation_and_edits() {
    let store = store();
    let inv = example_invoice(&store).await;
    invoice::cancel(&store, inv.invoice_id, None, None).await.unwrap();

    let err = invoice::add_item(&store, inv.invoice_id, free_line("Late", "1", "100"))
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::Policy(_)));

    let inv = invoice::refresh_status_from_payments(&store, inv.invoice_id, None)
        .await
        .unwrap();
    assert_eq!(inv.status(), InvoiceStatus::Cancelled);
}

#[tokio::test]
async fn negative_discount_lines_reduce_totals() {
    let store = store();
    let inv = invoice::create_invoice(&store, invoice_input(Uuid::new_v4()))
        .await
        .unwrap();
    invoice::add_item(&store, inv.invoice_id, free_line("Work", "1", "100000"))
        .await
        .unwrap();
    invoice::add_item(&store, inv.invoice_id, free_line("Discount", "1", "-10000"))
        .await
        .unwrap();

    let inv = store.fetch_invoice(inv.invoice_id).await.unwrap().unwrap();
    assert_eq!(inv.subtotal_amount, dec("90000.00"));
    assert_eq!(inv.vat_amount, dec("16200.00"));
    assert_eq!(inv.total_amount, dec("106200.00"));
}

#[tokio::test]
async fn item_update_keeps_cost_snapshot() {
    let store = store();
    let inv = invoice::create_invoice(&store, invoice_input(Uuid::new_v4()))
        .await
        .unwrap();
    let mut line = free_line("Custom", "1", "50000");
    line.unit_cost = Some(dec("30000"));
    let item = invoice::add_item(&store, inv.invoice_id, line).await.unwrap();

    let changes = UpdateInvoiceItem {
        unit_price: Some(dec("60000")),
        ..Default::default()
    };
    let item = invoice::update_item(&store, item.item_id, changes).await.unwrap();
    assert_eq!(item.unit_cost, dec("30000"));
    assert_eq!(item.total_price, dec("60000.00"));
}

#[tokio::test]
async fn line_items_require_a_positive_quantity() {
    let store = store();
    let inv = invoice::create_invoice(&store, invoice_input(Uuid::new_v4()))
        .await
        .unwrap();

    let err = invoice::add_item(&store, inv.invoice_id, free_line("Void", "0", "100"))
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::Validation(_)));

    let err = invoice::add_item(&store, inv.invoice_id, free_line("Backwards", "-1", "100"))
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::Validation(_)));

    let item = invoice::add_item(&store, inv.invoice_id, free_line("Work", "1", "100"))
        .await
        .unwrap();
    let changes = UpdateInvoiceItem {
        quantity: Some(dec("-2")),
        ..Default::default()
    };
    let err = invoice::update_item(&store, item.item_id, changes).await.unwrap_err();
    assert!(matches!(err, BillingError::Validation(_)));
}

#[tokio::test]
async fn signing_records_the_signer_once() {
    let store = store();
    let inv = example_invoice(&store).await;
    assert!(inv.signed_by.is_none());

    let inv = invoice::sign(&store, inv.invoice_id, "J. Okello".into()).await.unwrap();
    assert_eq!(inv.signed_by.as_deref(), Some("J. Okello"));
    assert!(inv.signed_at.is_some());

    let err = invoice::sign(&store, inv.invoice_id, "Someone Else".into())
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::Policy(_)));

    let inv = store.fetch_invoice(inv.invoice_id).await.unwrap().unwrap();
    assert_eq!(inv.signed_by.as_deref(), Some("J. Okello"));
}

#[tokio::test]
async fn signing_rejects_blank_signers_and_cancelled_invoices() {
    let store = store();
    let inv = example_invoice(&store).await;

    let err = invoice::sign(&store, inv.invoice_id, "   ".into()).await.unwrap_err();
    assert!(matches!(err, BillingError::Validation(_)));

    invoice::cancel(&store, inv.invoice_id, None, None).await.unwrap();
    let err = invoice::sign(&store, inv.invoice_id, "J. Okello".into()).await.unwrap_err();
    assert!(matches!(err, BillingError::Policy(_)));
}

#[tokio::test]
async fn outstanding_never_reports_negative() {
    assert_eq!(
        invoice::outstanding(dec("100"), dec("120"), Decimal::ZERO),
        Decimal::ZERO
    );
}
