mod common;

use std::sync::Arc;

use uuid::Uuid;

use billing_core::BillingError;
use billing_engine::models::{InvoiceStatus, PaymentMethod};
use billing_engine::services::{invoice, payment};
use billing_engine::store::{MemStore, Store};

use common::{dec, example_invoice, free_line, invoice_input, payment_input, store};

#[tokio::test]
async fn rejects_non_positive_amounts() {
    let store = store();
    let inv = example_invoice(&store).await;

    let err = payment::record_payment(&store, payment_input(inv.invoice_id, "0"))
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::Validation(_)));

    let err = payment::record_payment(&store, payment_input(inv.invoice_id, "-500"))
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::Validation(_)));
}

#[tokio::test]
async fn rejects_fractional_amounts() {
    let store = store();
    let inv = example_invoice(&store).await;

    let err = payment::record_payment(&store, payment_input(inv.invoice_id, "1000.50"))
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::Validation(_)));
}

#[tokio::test]
async fn rejects_overpayment() {
    let store = store();
    let inv = example_invoice(&store).await;

    let err = payment::record_payment(&store, payment_input(inv.invoice_id, "300000"))
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::Validation(_)));

    // After a partial payment the limit shrinks to the open balance.
    payment::record_payment(&store, payment_input(inv.invoice_id, "200000"))
        .await
        .unwrap();
    let err = payment::record_payment(&store, payment_input(inv.invoice_id, "100000"))
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::Validation(_)));
}

#[tokio::test]
async fn rejects_payments_on_cancelled_invoices() {
    let store = store();
    let inv = example_invoice(&store).await;
    invoice::cancel(&store, inv.invoice_id, None, None).await.unwrap();

    let err = payment::record_payment(&store, payment_input(inv.invoice_id, "100000"))
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::Policy(_)));
}

#[tokio::test]
async fn assigns_a_deterministic_receipt_number() {
    let store = store();
    let inv = example_invoice(&store).await;

    let (pay, _) = payment::record_payment(&store, payment_input(inv.invoice_id, "100000"))
        .await
        .unwrap();

    let receipt = pay.receipt_number.expect("receipt assigned on persist");
    let expected = payment::receipt_number(pay.payment_id, pay.paid_at);
    assert_eq!(receipt, expected);
    assert!(receipt.starts_with("RCPT-"));
}

#[tokio::test]
async fn receipt_assignment_is_one_shot() {
    let store = store();
    let inv = example_invoice(&store).await;

    let (pay, _) = payment::record_payment(&store, payment_input(inv.invoice_id, "100000"))
        .await
        .unwrap();
    let original = pay.receipt_number.clone().unwrap();

    let assigned = store
        .assign_receipt_number(pay.payment_id, "RCPT-19700101-DEADBEEF")
        .await
        .unwrap();
    assert!(!assigned);

    let pay = store.fetch_payment(pay.payment_id).await.unwrap().unwrap();
    assert_eq!(pay.receipt_number.as_deref(), Some(original.as_str()));
}

#[tokio::test]
async fn concurrent_full_payments_cannot_both_land() {
    let store = Arc::new(MemStore::new());
    let inv = {
        let inv = invoice::create_invoice(&*store, invoice_input(Uuid::new_v4()))
            .await
            .unwrap();
        let mut line = free_line("Job", "1", "100000");
        line.vat_exempt = true;
        invoice::add_item(&*store, inv.invoice_id, line).await.unwrap();
        store.fetch_invoice(inv.invoice_id).await.unwrap().unwrap()
    };

    let mut handles = Vec::new();
    for _ in 0..2 {
        let store = Arc::clone(&store);
        let invoice_id = inv.invoice_id;
        handles.push(tokio::spawn(async move {
            payment::record_payment(&*store, common::payment_input(invoice_id, "100000")).await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            successes += 1;
        }
    }
    assert_eq!(successes, 1);

    let payments = store.fetch_payments(inv.invoice_id).await.unwrap();
    assert_eq!(payments.len(), 1);
    let inv = store.fetch_invoice(inv.invoice_id).await.unwrap().unwrap();
    assert_eq!(inv.status(), InvoiceStatus::Paid);
}

#[tokio::test]
async fn other_method_keeps_its_free_text_label() {
    let store = store();
    let inv = example_invoice(&store).await;

    let mut input = payment_input(inv.invoice_id, "50000");
    input.method = PaymentMethod::Other;
    input.method_other = Some("Barter".to_string());

    let (pay, _) = payment::record_payment(&store, input).await.unwrap();
    assert_eq!(pay.method_label(), "Barter");
    assert_eq!(pay.amount, dec("50000"));
}
