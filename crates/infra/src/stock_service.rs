//! Stock application service: product CRUD and concurrency-safe stock adjustment.
//!
//! Adjustment is read → check → conditional write on the product version. A
//! lost race is retried up to `max_conflict_retries` times before surfacing as
//! [`StockServiceError::Conflict`].

use chrono::Utc;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::instrument;

use stockbill_core::{AggregateRoot, DomainError, ExpectedVersion, ProductId};
use stockbill_products::{AdjustStock, CreateProduct, Product, UpdateProduct};

use crate::product_store::ProductRepository;
use crate::store_error::StoreError;

const DEFAULT_CONFLICT_RETRIES: u32 = 5;

#[derive(Debug, Error)]
pub enum StockServiceError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("product {0} not found")]
    NotFound(ProductId),

    #[error("product code '{0}' is already in use")]
    DuplicateCode(String),

    #[error("insufficient stock for product {product_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: ProductId,
        available: Decimal,
        requested: Decimal,
    },

    #[error("concurrency conflict: {0}")]
    Conflict(String),

    #[error("storage failure: {0}")]
    Store(StoreError),
}

impl StockServiceError {
    pub fn kind(&self) -> &'static str {
        match self {
            StockServiceError::Validation(_) => "validation_error",
            StockServiceError::NotFound(_) => "not_found",
            StockServiceError::DuplicateCode(_) => "duplicate_code",
            StockServiceError::InsufficientStock { .. } => "insufficient_stock",
            StockServiceError::Conflict(_) => "conflict",
            StockServiceError::Store(_) => "store_error",
        }
    }

    fn from_domain(product_id: ProductId, err: DomainError) -> Self {
        match err {
            DomainError::InsufficientStock {
                available,
                requested,
            } => StockServiceError::InsufficientStock {
                product_id,
                available,
                requested,
            },
            DomainError::Conflict(msg) => StockServiceError::Conflict(msg),
            DomainError::NotFound => StockServiceError::NotFound(product_id),
            other => StockServiceError::Validation(other.to_string()),
        }
    }

    fn from_store(product_id: ProductId, code: &str, err: StoreError) -> Self {
        match err {
            StoreError::NotFound => StockServiceError::NotFound(product_id),
            StoreError::Duplicate(_) => StockServiceError::DuplicateCode(code.to_string()),
            StoreError::Conflict(msg) => StockServiceError::Conflict(msg),
            other => StockServiceError::Store(other),
        }
    }
}

impl From<StoreError> for StockServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => StockServiceError::Conflict(msg),
            other => StockServiceError::Store(other),
        }
    }
}

/// Fields accepted when creating or replacing a product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductDetails {
    pub code: String,
    pub description: String,
    pub stock: Decimal,
}

pub struct StockService<R> {
    products: R,
    max_conflict_retries: u32,
}

impl<R> StockService<R>
where
    R: ProductRepository,
{
    pub fn new(products: R) -> Self {
        Self {
            products,
            max_conflict_retries: DEFAULT_CONFLICT_RETRIES,
        }
    }

    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries.max(1);
        self
    }

    pub async fn list_products(&self) -> Result<Vec<Product>, StockServiceError> {
        Ok(self.products.list().await?)
    }

    pub async fn get_product(&self, id: ProductId) -> Result<Product, StockServiceError> {
        self.products
            .get(id)
            .await?
            .ok_or(StockServiceError::NotFound(id))
    }

    #[instrument(skip(self, details), fields(code = %details.code))]
    pub async fn create_product(
        &self,
        details: ProductDetails,
    ) -> Result<Product, StockServiceError> {
        let product_id = ProductId::new();
        let product = Product::create(&CreateProduct {
            product_id,
            code: details.code,
            description: details.description,
            stock: details.stock,
            occurred_at: Utc::now(),
        })
        .map_err(|e| StockServiceError::from_domain(product_id, e))?;

        if self.products.find_by_code(product.code()).await?.is_some() {
            return Err(StockServiceError::DuplicateCode(product.code().to_string()));
        }

        let saved = self
            .products
            .save(&product, ExpectedVersion::Exact(0))
            .await
            .map_err(|e| StockServiceError::from_store(product_id, product.code(), e))?;

        tracing::info!(product_id = %product_id, code = saved.code(), stock = %saved.stock(), "product created");
        Ok(saved)
    }

    #[instrument(skip(self, details), fields(product_id = %id))]
    pub async fn update_product(
        &self,
        id: ProductId,
        details: ProductDetails,
    ) -> Result<Product, StockServiceError> {
        let mut product = self.get_product(id).await?;
        let previous_code = product.code().to_string();

        product
            .update(&UpdateProduct {
                product_id: id,
                code: details.code,
                description: details.description,
                stock: details.stock,
                occurred_at: Utc::now(),
            })
            .map_err(|e| StockServiceError::from_domain(id, e))?;

        if product.code() != previous_code {
            if let Some(other) = self.products.find_by_code(product.code()).await? {
                if other.id_typed() != id {
                    return Err(StockServiceError::DuplicateCode(product.code().to_string()));
                }
            }
        }

        let saved = self
            .products
            .save(&product, ExpectedVersion::of(&product))
            .await
            .map_err(|e| StockServiceError::from_store(id, product.code(), e))?;

        tracing::info!(code = saved.code(), version = saved.version(), "product updated");
        Ok(saved)
    }

    /// Apply a signed delta to a product's stock.
    #[instrument(skip(self), fields(product_id = %id, delta = %delta))]
    pub async fn adjust_stock(
        &self,
        id: ProductId,
        delta: Decimal,
    ) -> Result<Product, StockServiceError> {
        let mut last_conflict = String::new();

        for attempt in 1..=self.max_conflict_retries {
            let mut product = self.get_product(id).await?;

            product
                .adjust_stock(&AdjustStock {
                    product_id: id,
                    delta,
                    occurred_at: Utc::now(),
                })
                .map_err(|e| StockServiceError::from_domain(id, e))?;

            match self
                .products
                .save(&product, ExpectedVersion::of(&product))
                .await
            {
                Ok(saved) => {
                    tracing::info!(stock = %saved.stock(), "stock adjusted");
                    return Ok(saved);
                }
                Err(StoreError::Conflict(msg)) => {
                    tracing::debug!(attempt, "stock adjustment lost a version race, retrying");
                    last_conflict = msg;
                }
                Err(StoreError::NotFound) => return Err(StockServiceError::NotFound(id)),
                Err(other) => return Err(StockServiceError::Store(other)),
            }
        }

        tracing::warn!(
            attempts = self.max_conflict_retries,
            "stock adjustment kept conflicting, giving up"
        );
        Err(StockServiceError::Conflict(last_conflict))
    }

    #[instrument(skip(self), fields(product_id = %id))]
    pub async fn delete_product(&self, id: ProductId) -> Result<(), StockServiceError> {
        self.products.delete(id).await.map_err(|e| match e {
            StoreError::NotFound => StockServiceError::NotFound(id),
            other => other.into(),
        })?;
        tracing::info!("product deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::product_store::InMemoryProductRepository;

    fn service() -> StockService<Arc<InMemoryProductRepository>> {
        StockService::new(Arc::new(InMemoryProductRepository::new()))
    }

    fn details(code: &str, stock: i64) -> ProductDetails {
        ProductDetails {
            code: code.to_string(),
            description: format!("{code} description"),
            stock: Decimal::from(stock),
        }
    }

    #[tokio::test]
    async fn create_rejects_duplicate_codes() {
        let svc = service();
        svc.create_product(details("P-1", 1)).await.unwrap();

        let err = svc.create_product(details("P-1", 2)).await.unwrap_err();
        assert_eq!(err.kind(), "duplicate_code");
    }

    #[tokio::test]
    async fn list_is_ordered_by_code() {
        let svc = service();
        for code in ["C", "A", "B"] {
            svc.create_product(details(code, 1)).await.unwrap();
        }
        let codes: Vec<String> = svc
            .list_products()
            .await
            .unwrap()
            .iter()
            .map(|p| p.code().to_string())
            .collect();
        assert_eq!(codes, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn adjust_rejects_underflow_and_keeps_stock() {
        let svc = service();
        let p = svc.create_product(details("P-1", 3)).await.unwrap();

        let err = svc
            .adjust_stock(p.id_typed(), Decimal::from(-4))
            .await
            .unwrap_err();
        match err {
            StockServiceError::InsufficientStock {
                available,
                requested,
                ..
            } => {
                assert_eq!(available, Decimal::from(3));
                assert_eq!(requested, Decimal::from(4));
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }
        assert_eq!(
            svc.get_product(p.id_typed()).await.unwrap().stock(),
            Decimal::from(3)
        );
    }

    #[tokio::test]
    async fn adjust_unknown_product_is_not_found() {
        let err = service()
            .adjust_stock(ProductId::new(), Decimal::ONE)
            .await
            .unwrap_err();
        assert!(matches!(err, StockServiceError::NotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_adjustments_never_lose_updates() {
        let svc = Arc::new(service().with_conflict_retries(50));
        let p = svc.create_product(details("P-1", 100)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let svc = svc.clone();
            let id = p.id_typed();
            handles.push(tokio::spawn(async move {
                svc.adjust_stock(id, Decimal::from(-3)).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let stock = svc.get_product(p.id_typed()).await.unwrap().stock();
        assert_eq!(stock, Decimal::from(40));
    }

    #[tokio::test]
    async fn update_revalidates_code_uniqueness() {
        let svc = service();
        svc.create_product(details("A", 1)).await.unwrap();
        let b = svc.create_product(details("B", 1)).await.unwrap();

        let err = svc
            .update_product(b.id_typed(), details("A", 5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "duplicate_code");

        let updated = svc
            .update_product(b.id_typed(), details("B", 5))
            .await
            .unwrap();
        assert_eq!(updated.stock(), Decimal::from(5));
        assert!(updated.updated_at().is_some());
    }

    #[tokio::test]
    async fn delete_then_get_is_not_found() {
        let svc = service();
        let p = svc.create_product(details("P-1", 1)).await.unwrap();
        svc.delete_product(p.id_typed()).await.unwrap();

        assert!(matches!(
            svc.get_product(p.id_typed()).await,
            Err(StockServiceError::NotFound(_))
        ));
        assert!(matches!(
            svc.delete_product(p.id_typed()).await,
            Err(StockServiceError::NotFound(_))
        ));
    }
}
