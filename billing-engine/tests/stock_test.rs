mod common;

use chrono::Utc;
use uuid::Uuid;

use billing_engine::models::{CreateInvoiceItem, InvoiceStatus, MovementType};
use billing_engine::services::{invoice, payment, stock};
use billing_engine::store::Store;

use common::{dec, invoice_input, payment_input, seed_product, store};

fn product_line(product_id: Uuid, quantity: &str, unit_price: &str) -> CreateInvoiceItem {
    CreateInvoiceItem {
        product_id: Some(product_id),
        service_id: None,
        description: "stocked product".to_string(),
        quantity: dec(quantity),
        unit_price: dec(unit_price),
        unit_cost: None,
        vat_exempt: true,
    }
}

#[tokio::test]
async fn paying_in_full_deducts_stock_once() {
    let store = store();
    let product = seed_product(&store, "Filter", "50000", "30000", "10", true).await;

    let inv = invoice::create_invoice(&store, invoice_input(Uuid::new_v4()))
        .await
        .unwrap();
    invoice::add_item(&store, inv.invoice_id, product_line(product.product_id, "3", "50000"))
        .await
        .unwrap();

    let (_pay, inv) = payment::record_payment(&store, payment_input(inv.invoice_id, "150000"))
        .await
        .unwrap();
    assert_eq!(inv.status(), InvoiceStatus::Paid);
    assert!(inv.stock_deducted_at.is_some());

    let product = store.fetch_product(product.product_id).await.unwrap().unwrap();
    assert_eq!(product.stock_quantity, dec("7"));

    let movements = store.fetch_stock_movements(product.product_id).await.unwrap();
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0].movement_type(), MovementType::Out);
    assert_eq!(movements[0].quantity, dec("3"));
    assert_eq!(movements[0].reference.as_deref(), Some(inv.number.as_str()));
}

#[tokio::test]
async fn rerunning_the_synchronizer_is_a_no_op() {
    let store = store();
    let product = seed_product(&store, "Belt", "20000", "12000", "5", true).await;

    let inv = invoice::create_invoice(&store, invoice_input(Uuid::new_v4()))
        .await
        .unwrap();
    invoice::add_item(&store, inv.invoice_id, product_line(product.product_id, "2", "20000"))
        .await
        .unwrap();
    let (_pay, inv) = payment::record_payment(&store, payment_input(inv.invoice_id, "40000"))
        .await
        .unwrap();

    let deducted = stock::deduct_stock_if_needed(&store, &inv).await.unwrap();
    assert!(!deducted);

    let product = store.fetch_product(product.product_id).await.unwrap().unwrap();
    assert_eq!(product.stock_quantity, dec("3"));
    assert_eq!(store.count_outbound_movements(&inv.number).await.unwrap(), 1);
}

#[tokio::test]
async fn unpaid_invoices_never_deduct() {
    let store = store();
    let product = seed_product(&store, "Hose", "10000", "6000", "8", true).await;

    let inv = invoice::create_invoice(&store, invoice_input(Uuid::new_v4()))
        .await
        .unwrap();
    invoice::add_item(&store, inv.invoice_id, product_line(product.product_id, "2", "10000"))
        .await
        .unwrap();
    let inv = store.fetch_invoice(inv.invoice_id).await.unwrap().unwrap();

    let deducted = stock::deduct_stock_if_needed(&store, &inv).await.unwrap();
    assert!(!deducted);

    let product = store.fetch_product(product.product_id).await.unwrap().unwrap();
    assert_eq!(product.stock_quantity, dec("8"));
}

#[tokio::test]
async fn untracked_products_and_free_lines_leave_no_stamp() {
    let store = store();
    let product = seed_product(&store, "Digital good", "25000", "0", "0", false).await;

    let inv = invoice::create_invoice(&store, invoice_input(Uuid::new_v4()))
        .await
        .unwrap();
    invoice::add_item(&store, inv.invoice_id, product_line(product.product_id, "1", "25000"))
        .await
        .unwrap();
    let (_pay, inv) = payment::record_payment(&store, payment_input(inv.invoice_id, "25000"))
        .await
        .unwrap();

    assert_eq!(inv.status(), InvoiceStatus::Paid);
    // Nothing deductible, so the timestamp stays unset and a later tracked
    // line can still trigger a real deduction.
    assert!(inv.stock_deducted_at.is_none());
    assert_eq!(store.count_outbound_movements(&inv.number).await.unwrap(), 0);
}

#[tokio::test]
async fn stale_stamp_without_movements_is_repaired() {
    let store = store();
    let product = seed_product(&store, "Valve", "30000", "18000", "4", true).await;

    let inv = invoice::create_invoice(&store, invoice_input(Uuid::new_v4()))
        .await
        .unwrap();
    invoice::add_item(&store, inv.invoice_id, product_line(product.product_id, "2", "30000"))
        .await
        .unwrap();
    let (_pay, mut inv) = payment::record_payment(&store, payment_input(inv.invoice_id, "60000"))
        .await
        .unwrap();

    // Simulate the earlier-no-op case: stamp present but no movement rows
    // matching the invoice number (renumbering orphans the old movements).
    inv = store.fetch_invoice(inv.invoice_id).await.unwrap().unwrap();
    inv.stock_deducted_at = Some(Utc::now());
    inv.number = format!("{}-R", inv.number);
    store.update_invoice(&inv).await.unwrap();

    let deducted = stock::deduct_stock_if_needed(&store, &inv).await.unwrap();
    assert!(deducted);
    assert_eq!(store.count_outbound_movements(&inv.number).await.unwrap(), 1);
}

#[tokio::test]
async fn stock_may_go_negative() {
    let store = store();
    let product = seed_product(&store, "Scarce part", "10000", "7000", "1", true).await;

    let inv = invoice::create_invoice(&store, invoice_input(Uuid::new_v4()))
        .await
        .unwrap();
    invoice::add_item(&store, inv.invoice_id, product_line(product.product_id, "5", "10000"))
        .await
        .unwrap();
    payment::record_payment(&store, payment_input(inv.invoice_id, "50000"))
        .await
        .unwrap();

    let product = store.fetch_product(product.product_id).await.unwrap().unwrap();
    assert_eq!(product.stock_quantity, dec("-4"));
}
