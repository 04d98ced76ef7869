use std::sync::Arc;

use anyhow::Context;

use stockbill_api::app::{self, StockServices};
use stockbill_infra::config::StockConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stockbill_observability::init("stock");

    let config = StockConfig::from_env().context("failed to load stock configuration")?;
    let services = StockServices::from_config(&config).await?;
    let app = app::build_stock_app(Arc::new(services));

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(addr = %listener.local_addr()?, "stock service listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(app::shutdown_signal())
        .await?;
    Ok(())
}
