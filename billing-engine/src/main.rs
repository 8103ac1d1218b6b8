use secrecy::ExposeSecret;
use tracing::info;

use billing_core::config::Config;
use billing_core::observability::init_tracing;
use billing_engine::services::metrics::init_metrics;
use billing_engine::store::PgStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config.log_level);
    init_metrics();

    info!(
        currency = %config.billing.currency,
        vat_rate = %config.billing.vat_rate,
        "Starting billing engine"
    );

    let store = PgStore::new(
        config.database.url.expose_secret(),
        config.database.max_connections,
        config.database.min_connections,
    )
    .await?;

    store.run_migrations().await?;
    store.health_check().await?;

    info!("Billing engine ready");

    Ok(())
}
