//! Domain models for the billing engine.

mod catalog;
mod invoice;
mod payment;
mod profit;
mod quotation;
mod refund;
mod sequence;
pub mod valuation;

pub use catalog::{
    CreateProduct, CreateService, MovementType, Product, Service, StockDeduction, StockMovement,
};
pub use invoice::{CreateInvoice, CreateInvoiceItem, Invoice, InvoiceItem, InvoiceStatus, UpdateInvoiceItem};
pub use payment::{Payment, PaymentMethod, RecordPayment};
pub use profit::ProfitRecord;
pub use quotation::{
    CreateQuotation, CreateQuotationItem, Quotation, QuotationItem, QuotationStatus,
    UpdateQuotationItem,
};
pub use refund::{RecordRefund, Refund};
pub use sequence::{DocumentKind, SequenceCounter};
