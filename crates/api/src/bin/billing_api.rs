use std::sync::Arc;

use anyhow::Context;

use stockbill_api::app::{self, BillingServices};
use stockbill_infra::config::BillingConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stockbill_observability::init("billing");

    let config = BillingConfig::from_env().context("failed to load billing configuration")?;
    let services = BillingServices::from_config(&config).await?;
    let app = app::build_billing_app(Arc::new(services));

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(
        addr = %listener.local_addr()?,
        stock_service_url = %config.stock_service_url,
        "billing service listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(app::shutdown_signal())
        .await?;
    Ok(())
}
