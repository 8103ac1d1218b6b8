//! billing-core: shared infrastructure for the billing engine workspace.

pub mod config;
pub mod error;
pub mod money;
pub mod observability;

pub use error::BillingError;
