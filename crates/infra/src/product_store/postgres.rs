//! Postgres-backed product repository.
//!
//! `products.code` carries a unique constraint (`products_code_key`) and every
//! update is conditional on `version`, so concurrent stock adjustments cannot
//! overwrite each other.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use stockbill_core::{AggregateRoot, ExpectedVersion, ProductId};
use stockbill_products::Product;

use super::r#trait::ProductRepository;
use crate::store_error::{map_sqlx_error, StoreError};

const SCHEMA: &str = include_str!("../../sql/stock.sql");

const SELECT_PRODUCT: &str = r#"
    SELECT id, code, description, stock, version, created_at, updated_at
    FROM products
"#;

#[derive(Debug, Clone)]
pub struct PostgresProductRepository {
    pool: Arc<PgPool>,
}

impl PostgresProductRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create tables if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    async fn insert(&self, product: &Product) -> Result<Product, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO products (id, code, description, stock, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 1, $5, $6)
            "#,
        )
        .bind(product.id_typed().as_uuid())
        .bind(product.code())
        .bind(product.description())
        .bind(product.stock())
        .bind(product.created_at())
        .bind(product.updated_at())
        .execute(&*self.pool)
        .await
        .map_err(|e| match map_sqlx_error("insert_product", e) {
            StoreError::Duplicate(constraint) if constraint == "products_code_key" => {
                StoreError::Duplicate(format!("product code {}", product.code()))
            }
            StoreError::Duplicate(_) => {
                StoreError::Conflict(format!("product {} already exists", product.id_typed()))
            }
            other => other,
        })?;

        Ok(product.clone().with_version(1))
    }

    async fn update(
        &self,
        product: &Product,
        expected: ExpectedVersion,
    ) -> Result<Product, StoreError> {
        let expected_version = match expected {
            ExpectedVersion::Exact(v) => Some(v as i64),
            ExpectedVersion::Any => None,
        };

        let version: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE products
            SET code = $2, description = $3, stock = $4, updated_at = $5, version = version + 1
            WHERE id = $1 AND ($6::BIGINT IS NULL OR version = $6)
            RETURNING version
            "#,
        )
        .bind(product.id_typed().as_uuid())
        .bind(product.code())
        .bind(product.description())
        .bind(product.stock())
        .bind(product.updated_at())
        .bind(expected_version)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| match map_sqlx_error("update_product", e) {
            StoreError::Duplicate(_) => {
                StoreError::Duplicate(format!("product code {}", product.code()))
            }
            other => other,
        })?;

        if let Some(version) = version {
            return Ok(product.clone().with_version(version as u64));
        }

        let current: Option<i64> =
            sqlx::query_scalar("SELECT version FROM products WHERE id = $1")
                .bind(product.id_typed().as_uuid())
                .fetch_optional(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("load_product_version", e))?;

        Err(match current {
            Some(actual) => StoreError::Conflict(format!(
                "product {}: expected {expected:?}, found version {actual}",
                product.id_typed()
            )),
            None => StoreError::NotFound,
        })
    }
}

#[async_trait]
impl ProductRepository for PostgresProductRepository {
    #[instrument(skip(self), err)]
    async fn list(&self) -> Result<Vec<Product>, StoreError> {
        let sql = format!("{SELECT_PRODUCT} ORDER BY code ASC");
        let rows = sqlx::query(&sql)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_products", e))?;

        rows.iter().map(decode).collect()
    }

    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn get(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let sql = format!("{SELECT_PRODUCT} WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_product", e))?;

        row.as_ref().map(decode).transpose()
    }

    #[instrument(skip(self), err)]
    async fn find_by_code(&self, code: &str) -> Result<Option<Product>, StoreError> {
        let sql = format!("{SELECT_PRODUCT} WHERE code = $1");
        let row = sqlx::query(&sql)
            .bind(code)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_product_by_code", e))?;

        row.as_ref().map(decode).transpose()
    }

    #[instrument(
        skip(self, product),
        fields(product_id = %product.id_typed(), code = product.code()),
        err
    )]
    async fn save(
        &self,
        product: &Product,
        expected: ExpectedVersion,
    ) -> Result<Product, StoreError> {
        if product.version() == 0 && expected.matches(0) {
            return self.insert(product).await;
        }
        self.update(product, expected).await
    }

    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn delete(&self, id: ProductId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_product", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

// SQLx row types

#[derive(Debug)]
struct ProductRow {
    id: Uuid,
    code: String,
    description: String,
    stock: Decimal,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for ProductRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(ProductRow {
            id: row.try_get("id")?,
            code: row.try_get("code")?,
            description: row.try_get("description")?,
            stock: row.try_get("stock")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Product::rehydrate(
            ProductId::from_uuid(row.id),
            row.code,
            row.description,
            row.stock,
            row.version as u64,
            row.created_at,
            row.updated_at,
        )
    }
}

fn decode(row: &sqlx::postgres::PgRow) -> Result<Product, StoreError> {
    ProductRow::from_row(row)
        .map(Product::from)
        .map_err(|e| StoreError::Backend(format!("failed to decode product row: {e}")))
}
