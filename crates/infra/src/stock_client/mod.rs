//! Client boundary for the remote Stock service.
//!
//! The billing side only ever needs two things from stock: look a product up,
//! and apply a signed delta to its balance. [`StockCapability`] is that seam;
//! [`HttpStockClient`] is the production adapter and tests substitute fakes.

pub mod http;

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockbill_core::ProductId;

pub use http::HttpStockClient;

/// Product as seen through the stock service's API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteProduct {
    pub id: ProductId,
    pub code: String,
    pub description: String,
    pub stock: Decimal,
}

/// Errors surfaced by a stock client after resilience handling.
#[derive(Debug, Error)]
pub enum StockClientError {
    #[error("product {0} not found")]
    NotFound(ProductId),

    #[error("insufficient stock for product {product_id}: {message}")]
    InsufficientStock {
        product_id: ProductId,
        message: String,
    },

    #[error("stock service is temporarily unavailable")]
    ServiceUnavailable,

    #[error("failed to communicate with stock service: {message}")]
    Communication {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl StockClientError {
    pub fn communication(message: impl Into<String>) -> Self {
        Self::Communication {
            message: message.into(),
            source: None,
        }
    }

    /// Stable machine-readable code.
    pub fn kind(&self) -> &'static str {
        match self {
            StockClientError::NotFound(_) => "not_found",
            StockClientError::InsufficientStock { .. } => "insufficient_stock",
            StockClientError::ServiceUnavailable => "service_unavailable",
            StockClientError::Communication { .. } => "communication_error",
        }
    }
}

/// Capability interface the invoice workflow depends on.
#[async_trait]
pub trait StockCapability: Send + Sync {
    /// `Ok(None)` when the stock service does not know the product.
    async fn lookup_product(
        &self,
        product_id: ProductId,
    ) -> Result<Option<RemoteProduct>, StockClientError>;

    /// Apply a signed delta (negative consumes).
    async fn adjust_stock(&self, product_id: ProductId, delta: Decimal)
        -> Result<(), StockClientError>;
}

#[async_trait]
impl<T> StockCapability for Arc<T>
where
    T: StockCapability + ?Sized,
{
    async fn lookup_product(
        &self,
        product_id: ProductId,
    ) -> Result<Option<RemoteProduct>, StockClientError> {
        (**self).lookup_product(product_id).await
    }

    async fn adjust_stock(
        &self,
        product_id: ProductId,
        delta: Decimal,
    ) -> Result<(), StockClientError> {
        (**self).adjust_stock(product_id, delta).await
    }
}
