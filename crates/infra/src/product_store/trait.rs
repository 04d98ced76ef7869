use std::sync::Arc;

use async_trait::async_trait;

use stockbill_core::{ExpectedVersion, ProductId};
use stockbill_products::Product;

use crate::store_error::StoreError;

/// Persistence contract for the stock service's products.
///
/// Product codes are unique (`StoreError::Duplicate`), every write is checked
/// against `expected`, and [`list`](Self::list) orders by code.
#[async_trait]
pub trait ProductRepository: Send + Sync {
    async fn list(&self) -> Result<Vec<Product>, StoreError>;

    async fn get(&self, id: ProductId) -> Result<Option<Product>, StoreError>;

    async fn find_by_code(&self, code: &str) -> Result<Option<Product>, StoreError>;

    /// Insert (`ExpectedVersion::Exact(0)`) or update. Returns the product with
    /// its new version.
    async fn save(&self, product: &Product, expected: ExpectedVersion)
        -> Result<Product, StoreError>;

    async fn delete(&self, id: ProductId) -> Result<(), StoreError>;
}

#[async_trait]
impl<T> ProductRepository for Arc<T>
where
    T: ProductRepository + ?Sized,
{
    async fn list(&self) -> Result<Vec<Product>, StoreError> {
        (**self).list().await
    }

    async fn get(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        (**self).get(id).await
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<Product>, StoreError> {
        (**self).find_by_code(code).await
    }

    async fn save(
        &self,
        product: &Product,
        expected: ExpectedVersion,
    ) -> Result<Product, StoreError> {
        (**self).save(product, expected).await
    }

    async fn delete(&self, id: ProductId) -> Result<(), StoreError> {
        (**self).delete(id).await
    }
}
