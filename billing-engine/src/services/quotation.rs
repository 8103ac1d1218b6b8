//! Quotation engine.
//!
//! Owns the quotation state machine (`DRAFT → SENT → {ACCEPTED, REJECTED} →
//! {CONVERTED, EXPIRED, CANCELLED}`), total recomputation on every line
//! change, and the one-shot conversion into an invoice.

use chrono::{Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::{info, instrument};
use uuid::Uuid;

use billing_core::money::{clamp_non_negative, quantize};
use billing_core::BillingError;

use crate::models::valuation::line_total;
use crate::models::{
    CreateQuotation, CreateQuotationItem, DocumentKind, Invoice, InvoiceItem, InvoiceStatus,
    Quotation, QuotationItem, QuotationStatus, UpdateQuotationItem,
};
use crate::services::metrics::DOCUMENTS_TOTAL;
use crate::services::numbering::next_number;
use crate::store::{Store, StoreError};

/// Derived quotation totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotationTotals {
    pub discount: Decimal,
    pub subtotal: Decimal,
    pub vat: Decimal,
    pub total: Decimal,
}

/// Compute quotation totals from line totals.
///
/// The discount is clamped into `[0, subtotal]` and applied before VAT, so
/// the taxable base is the non-exempt subtotal less the discount (floored at
/// zero). VAT is zero whenever the toggle is off, regardless of the stored
/// rate.
pub fn compute_totals(
    vat_enabled: bool,
    vat_rate: Decimal,
    discount: Decimal,
    lines: &[(Decimal, bool)],
) -> QuotationTotals {
    let subtotal = quantize(lines.iter().map(|(total, _)| *total).sum());
    let taxable_subtotal = quantize(
        lines
            .iter()
            .filter(|(_, vat_exempt)| !*vat_exempt)
            .map(|(total, _)| *total)
            .sum(),
    );

    let discount = clamp_non_negative(discount).min(clamp_non_negative(subtotal));
    let pre_tax = clamp_non_negative(subtotal - discount);
    let taxable_base = clamp_non_negative(taxable_subtotal - discount);

    let vat = if vat_enabled {
        quantize(taxable_base * vat_rate)
    } else {
        Decimal::ZERO
    };

    QuotationTotals {
        discount,
        subtotal,
        vat,
        total: quantize(pre_tax + vat),
    }
}

#[instrument(skip(store, input), fields(client_id = %input.client_id))]
pub async fn create_quotation<S: Store>(
    store: &S,
    input: CreateQuotation,
) -> Result<Quotation, BillingError> {
    if input.vat_rate < Decimal::ZERO {
        return Err(BillingError::validation("VAT rate cannot be negative"));
    }
    if input.discount_amount < Decimal::ZERO {
        return Err(BillingError::validation("discount cannot be negative"));
    }

    let now = Utc::now();
    let number = next_number(store, DocumentKind::Quotation, now.year()).await?;

    let quotation = Quotation {
        quotation_id: Uuid::new_v4(),
        branch_id: input.branch_id,
        client_id: input.client_id,
        number,
        status: QuotationStatus::Draft.as_str().to_string(),
        currency: input.currency,
        vat_enabled: input.vat_enabled,
        vat_rate: input.vat_rate,
        discount_amount: input.discount_amount,
        subtotal_amount: Decimal::ZERO,
        vat_amount: Decimal::ZERO,
        total_amount: Decimal::ZERO,
        valid_until: input.valid_until,
        notes: input.notes,
        cancelled_at: None,
        cancelled_by: None,
        cancel_reason: None,
        created_utc: now,
        updated_utc: now,
    };

    store.insert_quotation(&quotation).await?;

    DOCUMENTS_TOTAL.with_label_values(&["quotation"]).inc();
    info!(quotation_id = %quotation.quotation_id, number = %quotation.number, "Quotation created");

    Ok(quotation)
}

async fn fetch_required<S: Store>(
    store: &S,
    quotation_id: Uuid,
) -> Result<Quotation, BillingError> {
    store
        .fetch_quotation(quotation_id)
        .await?
        .ok_or_else(|| BillingError::not_found(format!("quotation {quotation_id}")))
}

fn ensure_editable(quotation: &Quotation) -> Result<(), BillingError> {
    if quotation.status().is_locked() {
        return Err(BillingError::policy(format!(
            "quotation {} is {} and can no longer be edited",
            quotation.number, quotation.status
        )));
    }
    Ok(())
}

/// Recompute and persist the derived totals from current line items.
///
/// The stored discount stays as entered; the clamp is applied only while
/// computing totals, so a discount set before any lines exist still counts
/// once lines arrive.
pub async fn recalculate_amounts<S: Store>(
    store: &S,
    quotation_id: Uuid,
) -> Result<Quotation, BillingError> {
    let mut quotation = fetch_required(store, quotation_id).await?;
    let items = store.fetch_quotation_items(quotation_id).await?;

    let lines: Vec<(Decimal, bool)> = items
        .iter()
        .map(|item| (item.total_price, item.vat_exempt))
        .collect();
    let totals = compute_totals(
        quotation.vat_enabled,
        quotation.vat_rate,
        quotation.discount_amount,
        &lines,
    );

    quotation.subtotal_amount = totals.subtotal;
    quotation.vat_amount = totals.vat;
    quotation.total_amount = totals.total;
    quotation.updated_utc = Utc::now();

    store.update_quotation(&quotation).await?;

    Ok(quotation)
}

#[instrument(skip(store, input), fields(quotation_id = %quotation_id))]
pub async fn add_item<S: Store>(
    store: &S,
    quotation_id: Uuid,
    input: CreateQuotationItem,
) -> Result<QuotationItem, BillingError> {
    let quotation = fetch_required(store, quotation_id).await?;
    ensure_editable(&quotation)?;

    if input.product_id.is_some() && input.service_id.is_some() {
        return Err(BillingError::validation(
            "line item cannot reference both a product and a service",
        ));
    }
    if input.quantity <= Decimal::ZERO {
        return Err(BillingError::validation("quantity must be positive"));
    }

    let item = QuotationItem {
        item_id: Uuid::new_v4(),
        quotation_id,
        product_id: input.product_id,
        service_id: input.service_id,
        description: input.description,
        quantity: input.quantity,
        unit_price: input.unit_price,
        vat_exempt: input.vat_exempt,
        total_price: line_total(input.quantity, input.unit_price),
        created_utc: Utc::now(),
    };

    store.insert_quotation_item(&item).await?;
    recalculate_amounts(store, quotation_id).await?;

    Ok(item)
}

#[instrument(skip(store, changes), fields(item_id = %item_id))]
pub async fn update_item<S: Store>(
    store: &S,
    item_id: Uuid,
    changes: UpdateQuotationItem,
) -> Result<QuotationItem, BillingError> {
    let mut item = store
        .fetch_quotation_item(item_id)
        .await?
        .ok_or_else(|| BillingError::not_found(format!("quotation item {item_id}")))?;
    let quotation = fetch_required(store, item.quotation_id).await?;
    ensure_editable(&quotation)?;

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

    store.update_quotation_item(&item).await?;
    recalculate_amounts(store, item.quotation_id).await?;

    Ok(item)
}

#[instrument(skip(store), fields(item_id = %item_id))]
pub async fn delete_item<S: Store>(store: &S, item_id: Uuid) -> Result<(), BillingError> {
    let item = store
        .fetch_quotation_item(item_id)
        .await?
        .ok_or_else(|| BillingError::not_found(format!("quotation item {item_id}")))?;
    let quotation = fetch_required(store, item.quotation_id).await?;
    ensure_editable(&quotation)?;

    store.delete_quotation_item(item_id).await?;
    recalculate_amounts(store, item.quotation_id).await?;

    Ok(())
}

/// Adjust the document-level discount and rederive totals.
pub async fn set_discount<S: Store>(
    store: &S,
    quotation_id: Uuid,
    discount: Decimal,
) -> Result<Quotation, BillingError> {
    if discount < Decimal::ZERO {
        return Err(BillingError::validation("discount cannot be negative"));
    }

    let mut quotation = fetch_required(store, quotation_id).await?;
    ensure_editable(&quotation)?;

    quotation.discount_amount = discount;
    quotation.updated_utc = Utc::now();
    store.update_quotation(&quotation).await?;

    recalculate_amounts(store, quotation_id).await
}

/// Toggle VAT and rederive totals.
pub async fn set_vat_enabled<S: Store>(
    store: &S,
    quotation_id: Uuid,
    vat_enabled: bool,
) -> Result<Quotation, BillingError> {
    let mut quotation = fetch_required(store, quotation_id).await?;
    ensure_editable(&quotation)?;

    quotation.vat_enabled = vat_enabled;
    quotation.updated_utc = Utc::now();
    store.update_quotation(&quotation).await?;

    recalculate_amounts(store, quotation_id).await
}

async fn transition<S: Store>(
    store: &S,
    quotation_id: Uuid,
    from: &[QuotationStatus],
    to: QuotationStatus,
) -> Result<Quotation, BillingError> {
    let mut quotation = fetch_required(store, quotation_id).await?;
    let current = quotation.status();
    if !from.contains(&current) {
        return Err(BillingError::policy(format!(
            "quotation {} cannot move from {} to {}",
            quotation.number,
            current.as_str(),
            to.as_str()
        )));
    }

    quotation.status = to.as_str().to_string();
    quotation.updated_utc = Utc::now();
    store.update_quotation(&quotation).await?;

    info!(quotation_id = %quotation_id, status = to.as_str(), "Quotation status changed");

    Ok(quotation)
}

pub async fn mark_sent<S: Store>(store: &S, quotation_id: Uuid) -> Result<Quotation, BillingError> {
    transition(store, quotation_id, &[QuotationStatus::Draft], QuotationStatus::Sent).await
}

pub async fn accept<S: Store>(store: &S, quotation_id: Uuid) -> Result<Quotation, BillingError> {
    transition(store, quotation_id, &[QuotationStatus::Sent], QuotationStatus::Accepted).await
}

pub async fn reject<S: Store>(store: &S, quotation_id: Uuid) -> Result<Quotation, BillingError> {
    transition(store, quotation_id, &[QuotationStatus::Sent], QuotationStatus::Rejected).await
}

#[instrument(skip(store, reason), fields(quotation_id = %quotation_id))]
pub async fn cancel<S: Store>(
    store: &S,
    quotation_id: Uuid,
    cancelled_by: Option<Uuid>,
    reason: Option<String>,
) -> Result<Quotation, BillingError> {
    let mut quotation = fetch_required(store, quotation_id).await?;
    if quotation.status().is_locked() {
        return Err(BillingError::policy(format!(
            "quotation {} is already {}",
            quotation.number, quotation.status
        )));
    }

    quotation.status = QuotationStatus::Cancelled.as_str().to_string();
    quotation.cancelled_at = Some(Utc::now());
    quotation.cancelled_by = cancelled_by;
    quotation.cancel_reason = reason;
    quotation.updated_utc = Utc::now();
    store.update_quotation(&quotation).await?;

    Ok(quotation)
}

/// Expire a stale quotation. Only DRAFT and SENT quotations expire; anything
/// further along keeps its state.
pub async fn refresh_expiry<S: Store>(
    store: &S,
    quotation_id: Uuid,
    today: NaiveDate,
) -> Result<Quotation, BillingError> {
    let mut quotation = fetch_required(store, quotation_id).await?;

    let expirable = matches!(
        quotation.status(),
        QuotationStatus::Draft | QuotationStatus::Sent
    );
    if expirable && quotation.is_expired(today) {
        quotation.status = QuotationStatus::Expired.as_str().to_string();
        quotation.updated_utc = Utc::now();
        store.update_quotation(&quotation).await?;
        info!(quotation_id = %quotation_id, number = %quotation.number, "Quotation expired");
    }

    Ok(quotation)
}

/// Convert an accepted quotation into a draft invoice.
///
/// Copies every line item (cost snapshot taken from the catalog for product
/// lines), materializes the document discount as a negative pseudo-line, and
/// marks the quotation CONVERTED. Idempotent: a second call returns the
/// invoice the first one created.
#[instrument(skip(store), fields(quotation_id = %quotation_id))]
pub async fn convert_to_invoice<S: Store>(
    store: &S,
    quotation_id: Uuid,
    prepared_by: Option<String>,
) -> Result<Invoice, BillingError> {
    let quotation = fetch_required(store, quotation_id).await?;

    if let Some(existing) = store.fetch_invoice_by_quotation(quotation_id).await? {
        return Ok(existing);
    }

    if quotation.status() != QuotationStatus::Accepted {
        return Err(BillingError::policy(format!(
            "quotation {} must be accepted before conversion (currently {})",
            quotation.number, quotation.status
        )));
    }

    let now = Utc::now();
    let number = next_number(store, DocumentKind::Invoice, now.year()).await?;
    let vat_rate = if quotation.vat_enabled {
        quotation.vat_rate
    } else {
        Decimal::ZERO
    };

    let invoice = Invoice {
        invoice_id: Uuid::new_v4(),
        branch_id: quotation.branch_id,
        client_id: quotation.client_id,
        quotation_id: Some(quotation_id),
        number,
        status: InvoiceStatus::Draft.as_str().to_string(),
        currency: quotation.currency.clone(),
        vat_rate,
        issued_at: None,
        due_at: None,
        notes: quotation.notes.clone(),
        prepared_by,
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

    match store.insert_invoice(&invoice).await {
        Ok(()) => {}
        // Lost the race: another caller converted first. Return theirs.
        Err(StoreError::Conflict(_)) => {
            if let Some(existing) = store.fetch_invoice_by_quotation(quotation_id).await? {
                return Ok(existing);
            }
            return Err(BillingError::Conflict(anyhow::anyhow!(
                "invoice for quotation {quotation_id} exists but could not be fetched"
            )));
        }
        Err(err) => return Err(err.into()),
    }

    let items = store.fetch_quotation_items(quotation_id).await?;
    for source in &items {
        let unit_cost = match source.product_id {
            Some(product_id) => store
                .fetch_product(product_id)
                .await?
                .map(|p| p.cost_price)
                .unwrap_or(Decimal::ZERO),
            None => Decimal::ZERO,
        };

        let item = InvoiceItem {
            item_id: Uuid::new_v4(),
            invoice_id: invoice.invoice_id,
            product_id: source.product_id,
            service_id: source.service_id,
            description: source.description.clone(),
            quantity: source.quantity,
            unit_price: source.unit_price,
            unit_cost,
            vat_exempt: source.vat_exempt,
            total_price: source.total_price,
            created_utc: now,
        };
        store.insert_invoice_item(&item).await?;
    }

    // The pseudo-line cannot exceed what the copied lines add up to.
    let subtotal = quantize(items.iter().map(|item| item.total_price).sum());
    let discount = clamp_non_negative(quotation.discount_amount).min(clamp_non_negative(subtotal));
    if discount > Decimal::ZERO {
        let discount_line = InvoiceItem {
            item_id: Uuid::new_v4(),
            invoice_id: invoice.invoice_id,
            product_id: None,
            service_id: None,
            description: "Discount".to_string(),
            quantity: Decimal::ONE,
            unit_price: -discount,
            unit_cost: Decimal::ZERO,
            vat_exempt: false,
            total_price: -discount,
            created_utc: now,
        };
        store.insert_invoice_item(&discount_line).await?;
    }

    let invoice = crate::services::invoice::recalculate_amounts(store, invoice.invoice_id).await?;

    let mut quotation = quotation;
    quotation.status = QuotationStatus::Converted.as_str().to_string();
    quotation.updated_utc = Utc::now();
    store.update_quotation(&quotation).await?;

    DOCUMENTS_TOTAL.with_label_values(&["invoice"]).inc();
    info!(
        quotation_id = %quotation_id,
        invoice_id = %invoice.invoice_id,
        number = %invoice.number,
        "Quotation converted to invoice"
    );

    Ok(invoice)
}
