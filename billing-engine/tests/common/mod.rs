#![allow(dead_code)]

use chrono::NaiveDate;
use rust_decimal::Decimal;
use uuid::Uuid;

use billing_engine::models::{
    CreateInvoice, CreateInvoiceItem, CreateProduct, CreateQuotation, CreateQuotationItem,
    CreateService, Invoice, PaymentMethod, Product, Quotation, RecordPayment, Service,
};
use billing_engine::services::{catalog, invoice, quotation};
use billing_engine::store::{MemStore, Store};

pub fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

pub fn store() -> MemStore {
    MemStore::new()
}

pub fn quotation_input(client_id: Uuid) -> CreateQuotation {
    CreateQuotation {
        branch_id: None,
        client_id,
        currency: "UGX".to_string(),
        vat_enabled: true,
        vat_rate: dec("0.18"),
        discount_amount: Decimal::ZERO,
        valid_until: None,
        notes: None,
    }
}

pub fn invoice_input(client_id: Uuid) -> CreateInvoice {
    CreateInvoice {
        branch_id: None,
        client_id,
        quotation_id: None,
        currency: "UGX".to_string(),
        vat_rate: dec("0.18"),
        due_at: None,
        notes: None,
        prepared_by: None,
    }
}

pub fn free_line(description: &str, quantity: &str, unit_price: &str) -> CreateInvoiceItem {
    CreateInvoiceItem {
        product_id: None,
        service_id: None,
        description: description.to_string(),
        quantity: dec(quantity),
        unit_price: dec(unit_price),
        unit_cost: None,
        vat_exempt: false,
    }
}

pub fn quotation_line(description: &str, quantity: &str, unit_price: &str) -> CreateQuotationItem {
    CreateQuotationItem {
        product_id: None,
        service_id: None,
        description: description.to_string(),
        quantity: dec(quantity),
        unit_price: dec(unit_price),
        vat_exempt: false,
    }
}

pub async fn seed_product(
    store: &MemStore,
    name: &str,
    unit_price: &str,
    cost_price: &str,
    stock: &str,
    track_stock: bool,
) -> Product {
    catalog::create_product(
        store,
        CreateProduct {
            sku: None,
            name: name.to_string(),
            unit_price: dec(unit_price),
            cost_price: dec(cost_price),
            stock_quantity: dec(stock),
            track_stock,
        },
    )
    .await
    .unwrap()
}

pub async fn seed_service(
    store: &MemStore,
    name: &str,
    unit_price: &str,
    service_charge: &str,
) -> Service {
    catalog::create_service(
        store,
        CreateService {
            name: name.to_string(),
            unit_price: dec(unit_price),
            service_charge: dec(service_charge),
        },
    )
    .await
    .unwrap()
}

/// Quotation in ACCEPTED state, ready for conversion.
pub async fn accepted_quotation(store: &MemStore, client_id: Uuid) -> Quotation {
    let q = quotation::create_quotation(store, quotation_input(client_id))
        .await
        .unwrap();
    quotation::mark_sent(store, q.quotation_id).await.unwrap();
    quotation::accept(store, q.quotation_id).await.unwrap()
}

/// Invoice with the canonical two-line example: 2 @ 50,000 and 1 @ 150,000
/// at 18% VAT, totalling 295,000.
pub async fn example_invoice(store: &MemStore) -> Invoice {
    let inv = invoice::create_invoice(store, invoice_input(Uuid::new_v4()))
        .await
        .unwrap();
    invoice::add_item(store, inv.invoice_id, free_line("Widget", "2", "50000"))
        .await
        .unwrap();
    invoice::add_item(store, inv.invoice_id, free_line("Gadget", "1", "150000"))
        .await
        .unwrap();
    store
        .fetch_invoice(inv.invoice_id)
        .await
        .unwrap()
        .unwrap()
}

pub fn payment_input(invoice_id: Uuid, amount: &str) -> RecordPayment {
    RecordPayment {
        invoice_id,
        method: PaymentMethod::Cash,
        method_other: None,
        amount: dec(amount),
        paid_at: None,
        recorded_by: None,
        reference: None,
        notes: None,
    }
}

pub fn a_date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}
