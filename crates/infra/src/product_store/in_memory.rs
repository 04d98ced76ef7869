use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use stockbill_core::{AggregateRoot, ExpectedVersion, ProductId};
use stockbill_products::Product;

use super::r#trait::ProductRepository;
use crate::store_error::StoreError;

/// In-memory product repository for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryProductRepository {
    products: RwLock<HashMap<ProductId, Product>>,
}

impl InMemoryProductRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> StoreError {
        StoreError::Backend("lock poisoned".to_string())
    }
}

#[async_trait]
impl ProductRepository for InMemoryProductRepository {
    async fn list(&self) -> Result<Vec<Product>, StoreError> {
        let products = self.products.read().map_err(|_| Self::poisoned())?;
        let mut all: Vec<Product> = products.values().cloned().collect();
        all.sort_by(|a, b| a.code().cmp(b.code()));
        Ok(all)
    }

    async fn get(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let products = self.products.read().map_err(|_| Self::poisoned())?;
        Ok(products.get(&id).cloned())
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<Product>, StoreError> {
        let products = self.products.read().map_err(|_| Self::poisoned())?;
        Ok(products.values().find(|p| p.code() == code).cloned())
    }

    async fn save(
        &self,
        product: &Product,
        expected: ExpectedVersion,
    ) -> Result<Product, StoreError> {
        let mut products = self.products.write().map_err(|_| Self::poisoned())?;
        let id = product.id_typed();

        let current = products.get(&id).map(|existing| existing.version());
        match current {
            Some(actual) if !expected.matches(actual) => {
                return Err(StoreError::Conflict(format!(
                    "product {id}: expected {expected:?}, found version {actual}"
                )));
            }
            None if !expected.matches(0) => return Err(StoreError::NotFound),
            _ => {}
        }

        let code_taken = products
            .values()
            .any(|other| other.code() == product.code() && other.id_typed() != id);
        if code_taken {
            return Err(StoreError::Duplicate(format!(
                "product code {}",
                product.code()
            )));
        }

        let saved = product.clone().with_version(current.unwrap_or(0) + 1);
        products.insert(id, saved.clone());
        Ok(saved)
    }

    async fn delete(&self, id: ProductId) -> Result<(), StoreError> {
        let mut products = self.products.write().map_err(|_| Self::poisoned())?;
        products.remove(&id).map(|_| ()).ok_or(StoreError::NotFound)
    }
}
