use anyhow::anyhow;
use dotenvy::dotenv;
use rust_decimal::Decimal;
use secrecy::Secret;
use serde::Deserialize;
use std::env;

use crate::error::BillingError;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub database: DatabaseConfig,
    pub billing: BillingDefaults,
    pub log_level: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// Defaults applied to new documents when the caller does not override them.
#[derive(Deserialize, Clone, Debug)]
pub struct BillingDefaults {
    pub currency: String,
    pub vat_rate: Decimal,
}

impl Config {
    pub fn from_env() -> Result<Self, BillingError> {
        dotenv().ok();

        let db_url = env::var("BILLING_DATABASE_URL")
            .map_err(|_| BillingError::Config(anyhow!("BILLING_DATABASE_URL must be set")))?;
        let max_connections = env::var("BILLING_DB_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .map_err(|e| BillingError::Config(anyhow!("invalid BILLING_DB_MAX_CONNECTIONS: {e}")))?;
        let min_connections = env::var("BILLING_DB_MIN_CONNECTIONS")
            .unwrap_or_else(|_| "1".to_string())
            .parse()
            .map_err(|e| BillingError::Config(anyhow!("invalid BILLING_DB_MIN_CONNECTIONS: {e}")))?;

        let currency = env::var("BILLING_DEFAULT_CURRENCY").unwrap_or_else(|_| "UGX".to_string());
        let vat_rate = env::var("BILLING_DEFAULT_VAT_RATE")
            .unwrap_or_else(|_| "0.18".to_string())
            .parse()
            .map_err(|e| BillingError::Config(anyhow!("invalid BILLING_DEFAULT_VAT_RATE: {e}")))?;

        let log_level = env::var("BILLING_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            database: DatabaseConfig {
                url: Secret::new(db_url),
                max_connections,
                min_connections,
            },
            billing: BillingDefaults { currency, vat_rate },
            log_level,
        })
    }
}
