use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use stockbill_infra::config::{BillingConfig, StockConfig};
use stockbill_infra::invoice_store::{InMemoryInvoiceStore, InvoiceStore, PostgresInvoiceStore};
use stockbill_infra::product_store::{
    InMemoryProductRepository, PostgresProductRepository, ProductRepository,
};
use stockbill_infra::stock_client::{HttpStockClient, StockCapability};
use stockbill_infra::{InvoiceWorkflow, StockService};

const MAX_DB_CONNECTIONS: u32 = 10;

pub type BillingWorkflow = InvoiceWorkflow<Arc<dyn InvoiceStore>, Arc<dyn StockCapability>>;

/// Everything the billing handlers need.
pub struct BillingServices {
    pub workflow: BillingWorkflow,
}

impl BillingServices {
    pub fn new(store: Arc<dyn InvoiceStore>, stock: Arc<dyn StockCapability>) -> Self {
        Self {
            workflow: InvoiceWorkflow::new(store, stock),
        }
    }

    /// In-memory invoice store in front of the given stock capability.
    pub fn in_memory(stock: Arc<dyn StockCapability>) -> Self {
        Self::new(Arc::new(InMemoryInvoiceStore::new()), stock)
    }

    /// Wire the billing process from configuration.
    ///
    /// Uses Postgres when `database_url` is set, the in-memory store otherwise.
    pub async fn from_config(config: &BillingConfig) -> anyhow::Result<Self> {
        let stock = HttpStockClient::new(config.stock_service_url.clone(), &config.resilience)
            .context("failed to build stock service client")?;

        let store: Arc<dyn InvoiceStore> = match &config.database_url {
            Some(url) => {
                let pool = PgPoolOptions::new()
                    .max_connections(MAX_DB_CONNECTIONS)
                    .connect(url)
                    .await
                    .context("failed to connect to billing database")?;
                let store = PostgresInvoiceStore::new(pool);
                store
                    .ensure_schema()
                    .await
                    .context("failed to apply billing schema")?;
                tracing::info!("using postgres invoice store");
                Arc::new(store)
            }
            None => {
                tracing::warn!("BILLING_DATABASE_URL not set; invoices are kept in memory");
                Arc::new(InMemoryInvoiceStore::new())
            }
        };

        Ok(Self::new(store, Arc::new(stock)))
    }
}

/// Everything the stock handlers need.
pub struct StockServices {
    pub stock: StockService<Arc<dyn ProductRepository>>,
}

impl StockServices {
    pub fn new(products: Arc<dyn ProductRepository>) -> Self {
        Self {
            stock: StockService::new(products),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryProductRepository::new()))
    }

    pub async fn from_config(config: &StockConfig) -> anyhow::Result<Self> {
        let products: Arc<dyn ProductRepository> = match &config.database_url {
            Some(url) => {
                let pool = PgPoolOptions::new()
                    .max_connections(MAX_DB_CONNECTIONS)
                    .connect(url)
                    .await
                    .context("failed to connect to stock database")?;
                let repo = PostgresProductRepository::new(pool);
                repo.ensure_schema()
                    .await
                    .context("failed to apply stock schema")?;
                tracing::info!("using postgres product repository");
                Arc::new(repo)
            }
            None => {
                tracing::warn!("STOCK_DATABASE_URL not set; products are kept in memory");
                Arc::new(InMemoryProductRepository::new())
            }
        };

        Ok(Self::new(products))
    }
}
