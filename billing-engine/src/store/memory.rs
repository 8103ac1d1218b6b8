//! In-memory store.
//!
//! Backs the integration tests and embedded use. A single mutex serializes
//! every operation, which satisfies the per-invoice ordering guarantee the
//! lifecycle rules require.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{
    DocumentKind, Invoice, InvoiceItem, MovementType, Payment, Product, ProfitRecord, Quotation,
    QuotationItem, Refund, Service, StockDeduction, StockMovement,
};
use crate::store::{Store, StoreError};

#[derive(Default)]
struct MemState {
    sequences: HashMap<(String, i32), i64>,
    quotations: HashMap<Uuid, Quotation>,
    quotation_items: Vec<QuotationItem>,
    invoices: HashMap<Uuid, Invoice>,
    invoice_items: Vec<InvoiceItem>,
    payments: Vec<Payment>,
    refunds: Vec<Refund>,
    profit_records: HashMap<Uuid, ProfitRecord>,
    products: HashMap<Uuid, Product>,
    services: HashMap<Uuid, Service>,
    movements: Vec<StockMovement>,
}

#[derive(Default)]
pub struct MemStore {
    state: Mutex<MemState>,
    /// Number of upcoming `next_sequence` calls that fail, for exercising
    /// the degraded numbering path.
    sequence_failures: AtomicU32,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` sequence increments fail as if storage were down.
    pub fn fail_next_sequences(&self, n: u32) {
        self.sequence_failures.store(n, Ordering::SeqCst);
    }
}

fn net_paid(state: &MemState, invoice_id: Uuid) -> Decimal {
    let paid: Decimal = state
        .payments
        .iter()
        .filter(|p| p.invoice_id == invoice_id)
        .map(|p| p.amount)
        .sum();
    let refunded: Decimal = state
        .refunds
        .iter()
        .filter(|r| r.invoice_id == invoice_id)
        .map(|r| r.amount)
        .sum();
    paid - refunded
}

#[async_trait]
impl Store for MemStore {
    async fn next_sequence(&self, kind: DocumentKind, year: i32) -> Result<i64, StoreError> {
        let failures = self.sequence_failures.load(Ordering::SeqCst);
        if failures > 0 {
            self.sequence_failures.store(failures - 1, Ordering::SeqCst);
            return Err(StoreError::Contention(
                "sequence counter unavailable".to_string(),
            ));
        }

        let mut state = self.state.lock().await;
        let counter = state
            .sequences
            .entry((kind.as_str().to_string(), year))
            .or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn insert_quotation(&self, quotation: &Quotation) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state
            .quotations
            .insert(quotation.quotation_id, quotation.clone());
        Ok(())
    }

    async fn fetch_quotation(&self, quotation_id: Uuid) -> Result<Option<Quotation>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.quotations.get(&quotation_id).cloned())
    }

    async fn update_quotation(&self, quotation: &Quotation) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if !state.quotations.contains_key(&quotation.quotation_id) {
            return Err(StoreError::NotFound(format!(
                "quotation {}",
                quotation.quotation_id
            )));
        }
        state
            .quotations
            .insert(quotation.quotation_id, quotation.clone());
        Ok(())
    }

    async fn insert_quotation_item(&self, item: &QuotationItem) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.quotation_items.push(item.clone());
        Ok(())
    }

    async fn fetch_quotation_item(
        &self,
        item_id: Uuid,
    ) -> Result<Option<QuotationItem>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .quotation_items
            .iter()
            .find(|i| i.item_id == item_id)
            .cloned())
    }

    async fn update_quotation_item(&self, item: &QuotationItem) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        match state
            .quotation_items
            .iter_mut()
            .find(|i| i.item_id == item.item_id)
        {
            Some(existing) => {
                *existing = item.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("quotation item {}", item.item_id))),
        }
    }

    async fn delete_quotation_item(&self, item_id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.quotation_items.len();
        state.quotation_items.retain(|i| i.item_id != item_id);
        Ok(state.quotation_items.len() < before)
    }

    async fn fetch_quotation_items(
        &self,
        quotation_id: Uuid,
    ) -> Result<Vec<QuotationItem>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .quotation_items
            .iter()
            .filter(|i| i.quotation_id == quotation_id)
            .cloned()
            .collect())
    }

    async fn insert_invoice(&self, invoice: &Invoice) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if let Some(quotation_id) = invoice.quotation_id {
            if state
                .invoices
                .values()
                .any(|inv| inv.quotation_id == Some(quotation_id))
            {
                return Err(StoreError::Conflict(format!(
                    "an invoice already exists for quotation {quotation_id}"
                )));
            }
        }
        state.invoices.insert(invoice.invoice_id, invoice.clone());
        Ok(())
    }

    async fn fetch_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.invoices.get(&invoice_id).cloned())
    }

    async fn fetch_invoice_by_quotation(
        &self,
        quotation_id: Uuid,
    ) -> Result<Option<Invoice>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .invoices
            .values()
            .find(|inv| inv.quotation_id == Some(quotation_id))
            .cloned())
    }

    async fn update_invoice(&self, invoice: &Invoice) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if !state.invoices.contains_key(&invoice.invoice_id) {
            return Err(StoreError::NotFound(format!("invoice {}", invoice.invoice_id)));
        }
        state.invoices.insert(invoice.invoice_id, invoice.clone());
        Ok(())
    }

    async fn insert_invoice_item(&self, item: &InvoiceItem) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.invoice_items.push(item.clone());
        Ok(())
    }

    async fn fetch_invoice_item(&self, item_id: Uuid) -> Result<Option<InvoiceItem>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .invoice_items
            .iter()
            .find(|i| i.item_id == item_id)
            .cloned())
    }

    async fn update_invoice_item(&self, item: &InvoiceItem) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        match state
            .invoice_items
            .iter_mut()
            .find(|i| i.item_id == item.item_id)
        {
            Some(existing) => {
                *existing = item.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("invoice item {}", item.item_id))),
        }
    }

    async fn delete_invoice_item(&self, item_id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.invoice_items.len();
        state.invoice_items.retain(|i| i.item_id != item_id);
        Ok(state.invoice_items.len() < before)
    }

    async fn fetch_invoice_items(&self, invoice_id: Uuid) -> Result<Vec<InvoiceItem>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .invoice_items
            .iter()
            .filter(|i| i.invoice_id == invoice_id)
            .cloned()
            .collect())
    }

    async fn insert_payment(&self, payment: &Payment) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let invoice = state
            .invoices
            .get(&payment.invoice_id)
            .ok_or_else(|| StoreError::NotFound(format!("invoice {}", payment.invoice_id)))?;
        let outstanding = invoice.total_amount - net_paid(&state, payment.invoice_id);
        if payment.amount > outstanding {
            return Err(StoreError::Conflict(format!(
                "payment {} exceeds outstanding balance {}",
                payment.amount, outstanding
            )));
        }
        state.payments.push(payment.clone());
        Ok(())
    }

    async fn fetch_payment(&self, payment_id: Uuid) -> Result<Option<Payment>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .payments
            .iter()
            .find(|p| p.payment_id == payment_id)
            .cloned())
    }

    async fn fetch_payments(&self, invoice_id: Uuid) -> Result<Vec<Payment>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .payments
            .iter()
            .filter(|p| p.invoice_id == invoice_id)
            .cloned()
            .collect())
    }

    async fn assign_receipt_number(
        &self,
        payment_id: Uuid,
        receipt_number: &str,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let payment = state
            .payments
            .iter_mut()
            .find(|p| p.payment_id == payment_id)
            .ok_or_else(|| StoreError::NotFound(format!("payment {payment_id}")))?;
        if payment
            .receipt_number
            .as_deref()
            .is_some_and(|n| !n.is_empty())
        {
            return Ok(false);
        }
        payment.receipt_number = Some(receipt_number.to_string());
        Ok(true)
    }

    async fn insert_refund(&self, refund: &Refund) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let payment = state
            .payments
            .iter()
            .find(|p| p.payment_id == refund.payment_id)
            .ok_or_else(|| StoreError::NotFound(format!("payment {}", refund.payment_id)))?;
        let already_refunded: Decimal = state
            .refunds
            .iter()
            .filter(|r| r.payment_id == refund.payment_id)
            .map(|r| r.amount)
            .sum();
        if refund.amount > payment.amount - already_refunded {
            return Err(StoreError::Conflict(format!(
                "refund {} exceeds refundable remainder {}",
                refund.amount,
                payment.amount - already_refunded
            )));
        }
        state.refunds.push(refund.clone());
        Ok(())
    }

    async fn fetch_refunds_for_invoice(&self, invoice_id: Uuid) -> Result<Vec<Refund>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .refunds
            .iter()
            .filter(|r| r.invoice_id == invoice_id)
            .cloned()
            .collect())
    }

    async fn fetch_refunds_for_payment(&self, payment_id: Uuid) -> Result<Vec<Refund>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .refunds
            .iter()
            .filter(|r| r.payment_id == payment_id)
            .cloned()
            .collect())
    }

    async fn upsert_profit_record(&self, record: &ProfitRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state
            .profit_records
            .insert(record.invoice_id, record.clone());
        Ok(())
    }

    async fn delete_profit_record(&self, invoice_id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        Ok(state.profit_records.remove(&invoice_id).is_some())
    }

    async fn fetch_profit_record(
        &self,
        invoice_id: Uuid,
    ) -> Result<Option<ProfitRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.profit_records.get(&invoice_id).cloned())
    }

    async fn insert_product(&self, product: &Product) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.products.values().any(|p| p.sku == product.sku) {
            return Err(StoreError::Conflict(format!(
                "product sku {} already exists",
                product.sku
            )));
        }
        state.products.insert(product.product_id, product.clone());
        Ok(())
    }

    async fn fetch_product(&self, product_id: Uuid) -> Result<Option<Product>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.products.get(&product_id).cloned())
    }

    async fn insert_service(&self, service: &Service) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.services.insert(service.service_id, service.clone());
        Ok(())
    }

    async fn fetch_service(&self, service_id: Uuid) -> Result<Option<Service>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.services.get(&service_id).cloned())
    }

    async fn apply_stock_deduction(
        &self,
        invoice_id: Uuid,
        reference: &str,
        plan: &[StockDeduction],
        deducted_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let already_stamped = state
            .invoices
            .get(&invoice_id)
            .ok_or_else(|| StoreError::NotFound(format!("invoice {invoice_id}")))?
            .stock_deducted_at
            .is_some();
        let movements_exist = state.movements.iter().any(|m| {
            m.reference.as_deref() == Some(reference)
                && m.movement_type() == MovementType::Out
        });
        if already_stamped && movements_exist {
            return Ok(false);
        }

        for line in plan {
            if let Some(product) = state.products.get_mut(&line.product_id) {
                product.stock_quantity -= line.quantity;
                product.updated_utc = deducted_at;
            }
            state.movements.push(StockMovement {
                movement_id: Uuid::new_v4(),
                product_id: line.product_id,
                movement_type: MovementType::Out.as_str().to_string(),
                quantity: line.quantity,
                reference: Some(reference.to_string()),
                notes: None,
                occurred_at: deducted_at,
                created_utc: deducted_at,
            });
        }

        if let Some(invoice) = state.invoices.get_mut(&invoice_id) {
            invoice.stock_deducted_at.get_or_insert(deducted_at);
        }
        Ok(true)
    }

    async fn count_outbound_movements(&self, reference: &str) -> Result<i64, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .movements
            .iter()
            .filter(|m| {
                m.reference.as_deref() == Some(reference)
                    && m.movement_type() == MovementType::Out
            })
            .count() as i64)
    }

    async fn fetch_stock_movements(
        &self,
        product_id: Uuid,
    ) -> Result<Vec<StockMovement>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .movements
            .iter()
            .filter(|m| m.product_id == product_id)
            .cloned()
            .collect())
    }
}
