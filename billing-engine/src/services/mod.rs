//! Lifecycle engine operations.
//!
//! Each module owns one slice of the document lifecycle and is generic over
//! the [`Store`](crate::store::Store) backend. Mutating operations persist
//! through composite store methods so their locking requirements hold on any
//! backend.

pub mod catalog;
pub mod invoice;
pub mod metrics;
pub mod numbering;
pub mod payment;
pub mod profit;
pub mod quotation;
pub mod refund;
pub mod stock;
