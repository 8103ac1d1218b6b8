//! billing-engine: financial document lifecycle engine.
//!
//! Quotations convert to invoices, payments and refunds settle against them,
//! and fully paid invoices drive one-shot stock deduction plus a derived
//! profit ledger. Storage is reached through the [`store::Store`] trait.

pub mod models;
pub mod services;
pub mod store;
