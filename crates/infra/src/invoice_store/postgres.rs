//! Postgres-backed invoice store.
//!
//! Tables: `invoices`, `invoice_items` (cascade-deleted with their invoice) and a
//! single-row `invoice_number_counter`. Numbers are issued with one atomic
//! `UPDATE .. RETURNING` on the counter, which never hands out a number at or
//! below the current maximum. The `UNIQUE (number)` constraint is the final
//! guard; a clash surfaces as `StoreError::Duplicate`.
//!
//! Writes are conditional on the `version` column:
//!
//! | Operation | Condition                           | On mismatch          |
//! |-----------|-------------------------------------|----------------------|
//! | insert    | no row with this id                 | `Conflict`           |
//! | update    | `version = expected`                | `Conflict`/`NotFound`|
//! | delete    | `version = loaded` and still `open` | `Conflict`/`NotFound`|

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use stockbill_core::{AggregateRoot, ExpectedVersion, InvoiceId, ProductId, Quantity};
use stockbill_invoicing::{Invoice, InvoiceItem, InvoiceStatus};

use super::r#trait::InvoiceStore;
use crate::store_error::{map_sqlx_error, StoreError};

const SCHEMA: &str = include_str!("../../sql/billing.sql");

#[derive(Debug, Clone)]
pub struct PostgresInvoiceStore {
    pool: Arc<PgPool>,
}

impl PostgresInvoiceStore {
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

    async fn insert(&self, invoice: &Invoice) -> Result<Invoice, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query(
            r#"
            INSERT INTO invoices (id, number, status, created_at, printed_at, version)
            VALUES ($1, $2, $3, $4, $5, 1)
            "#,
        )
        .bind(invoice.id_typed().as_uuid())
        .bind(invoice.number() as i64)
        .bind(invoice.status().as_str())
        .bind(invoice.created_at())
        .bind(invoice.printed_at())
        .execute(&mut *tx)
        .await
        .map_err(|e| match map_sqlx_error("insert_invoice", e) {
            StoreError::Duplicate(constraint) if constraint == "invoices_number_key" => {
                StoreError::Duplicate(format!("invoice number {}", invoice.number()))
            }
            StoreError::Duplicate(_) => {
                StoreError::Conflict(format!("invoice {} already exists", invoice.id_typed()))
            }
            other => other,
        })?;

        insert_items(&mut tx, invoice.id_typed(), invoice.items()).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(invoice.clone().with_version(1))
    }

    async fn update(
        &self,
        invoice: &Invoice,
        expected: ExpectedVersion,
    ) -> Result<Invoice, StoreError> {
        let expected_version = match expected {
            ExpectedVersion::Exact(v) => Some(v as i64),
            ExpectedVersion::Any => None,
        };

        let row = sqlx::query(
            r#"
            UPDATE invoices
            SET status = $2, printed_at = $3, version = version + 1
            WHERE id = $1 AND ($4::BIGINT IS NULL OR version = $4)
            RETURNING version
            "#,
        )
        .bind(invoice.id_typed().as_uuid())
        .bind(invoice.status().as_str())
        .bind(invoice.printed_at())
        .bind(expected_version)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_invoice", e))?;

        match row {
            Some(row) => {
                let version: i64 = row
                    .try_get("version")
                    .map_err(|e| map_sqlx_error("update_invoice", e))?;
                Ok(invoice.clone().with_version(version as u64))
            }
            None => Err(self.explain_missed_write(invoice.id_typed(), expected).await),
        }
    }

    /// A conditional write touched no row: tell "gone" apart from "changed".
    async fn explain_missed_write(&self, id: InvoiceId, expected: ExpectedVersion) -> StoreError {
        let current = sqlx::query_scalar::<_, i64>("SELECT version FROM invoices WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await;

        match current {
            Ok(Some(actual)) => StoreError::Conflict(format!(
                "invoice {id}: expected {expected:?}, found version {actual}"
            )),
            Ok(None) => StoreError::NotFound,
            Err(e) => map_sqlx_error("load_invoice_version", e),
        }
    }

    async fn load_items(
        &self,
        invoice_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<InvoiceItem>>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT invoice_id, product_id, product_code, product_description, quantity
            FROM invoice_items
            WHERE invoice_id = ANY($1)
            ORDER BY invoice_id, line_no
            "#,
        )
        .bind(invoice_ids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_invoice_items", e))?;

        let mut items: HashMap<Uuid, Vec<InvoiceItem>> = HashMap::new();
        for row in rows {
            let item = InvoiceItemRow::from_row(&row)
                .map_err(|e| StoreError::Backend(format!("failed to decode invoice item row: {e}")))?;
            let invoice_id = item.invoice_id;
            items.entry(invoice_id).or_default().push(item.try_into()?);
        }
        Ok(items)
    }

    async fn hydrate(&self, rows: Vec<InvoiceRow>) -> Result<Vec<Invoice>, StoreError> {
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let mut items = self.load_items(&ids).await?;

        rows.into_iter()
            .map(|row| {
                let lines = items.remove(&row.id).unwrap_or_default();
                row.into_invoice(lines)
            })
            .collect()
    }
}

async fn insert_items(
    tx: &mut Transaction<'_, Postgres>,
    invoice_id: InvoiceId,
    items: &[InvoiceItem],
) -> Result<(), StoreError> {
    for (line_no, item) in items.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO invoice_items (
                invoice_id,
                line_no,
                product_id,
                product_code,
                product_description,
                quantity
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(invoice_id.as_uuid())
        .bind(line_no as i32 + 1)
        .bind(item.product_id.as_uuid())
        .bind(&item.product_code)
        .bind(&item.product_description)
        .bind(item.quantity.value())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_invoice_item", e))?;
    }
    Ok(())
}

#[async_trait]
impl InvoiceStore for PostgresInvoiceStore {
    #[instrument(skip(self), err)]
    async fn next_invoice_number(&self) -> Result<u64, StoreError> {
        let next: i64 = sqlx::query_scalar(
            r#"
            UPDATE invoice_number_counter
            SET last_number = GREATEST(
                last_number,
                COALESCE((SELECT MAX(number) FROM invoices), 0)
            ) + 1
            WHERE id = 1
            RETURNING last_number
            "#,
        )
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("next_invoice_number", e))?;

        Ok(next as u64)
    }

    #[instrument(
        skip(self, invoice),
        fields(invoice_id = %invoice.id_typed(), number = invoice.number()),
        err
    )]
    async fn save(
        &self,
        invoice: &Invoice,
        expected: ExpectedVersion,
    ) -> Result<Invoice, StoreError> {
        if invoice.version() == 0 && expected.matches(0) {
            return self.insert(invoice).await;
        }
        self.update(invoice, expected).await
    }

    #[instrument(skip(self), fields(invoice_id = %id), err)]
    async fn find_by_id(&self, id: InvoiceId) -> Result<Option<Invoice>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, number, status, created_at, printed_at, version
            FROM invoices
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_invoice", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let row = InvoiceRow::from_row(&row)
            .map_err(|e| StoreError::Backend(format!("failed to decode invoice row: {e}")))?;

        Ok(self.hydrate(vec![row]).await?.pop())
    }

    #[instrument(skip(self, invoice), fields(invoice_id = %invoice.id_typed()), err)]
    async fn delete(&self, invoice: &Invoice) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM invoices
            WHERE id = $1 AND version = $2 AND status = 'open'
            "#,
        )
        .bind(invoice.id_typed().as_uuid())
        .bind(invoice.version() as i64)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("delete_invoice", e))?;

        if result.rows_affected() == 0 {
            return Err(self
                .explain_missed_write(invoice.id_typed(), ExpectedVersion::of(invoice))
                .await);
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn list_all(&self) -> Result<Vec<Invoice>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, number, status, created_at, printed_at, version
            FROM invoices
            ORDER BY number DESC
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_invoices", e))?;

        let mut invoices = Vec::with_capacity(rows.len());
        for row in rows {
            invoices.push(
                InvoiceRow::from_row(&row)
                    .map_err(|e| StoreError::Backend(format!("failed to decode invoice row: {e}")))?,
            );
        }

        self.hydrate(invoices).await
    }
}

// SQLx row types

#[derive(Debug)]
struct InvoiceRow {
    id: Uuid,
    number: i64,
    status: String,
    created_at: DateTime<Utc>,
    printed_at: Option<DateTime<Utc>>,
    version: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for InvoiceRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(InvoiceRow {
            id: row.try_get("id")?,
            number: row.try_get("number")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
            printed_at: row.try_get("printed_at")?,
            version: row.try_get("version")?,
        })
    }
}

impl InvoiceRow {
    fn into_invoice(self, items: Vec<InvoiceItem>) -> Result<Invoice, StoreError> {
        let status: InvoiceStatus = self
            .status
            .parse()
            .map_err(|e| StoreError::Backend(format!("invoice {}: {e}", self.id)))?;

        Ok(Invoice::rehydrate(
            InvoiceId::from_uuid(self.id),
            self.number as u64,
            status,
            self.created_at,
            self.printed_at,
            items,
            self.version as u64,
        ))
    }
}

#[derive(Debug)]
struct InvoiceItemRow {
    invoice_id: Uuid,
    product_id: Uuid,
    product_code: String,
    product_description: String,
    quantity: Decimal,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for InvoiceItemRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(InvoiceItemRow {
            invoice_id: row.try_get("invoice_id")?,
            product_id: row.try_get("product_id")?,
            product_code: row.try_get("product_code")?,
            product_description: row.try_get("product_description")?,
            quantity: row.try_get("quantity")?,
        })
    }
}

impl TryFrom<InvoiceItemRow> for InvoiceItem {
    type Error = StoreError;

    fn try_from(row: InvoiceItemRow) -> Result<Self, Self::Error> {
        let quantity = Quantity::new(row.quantity)
            .map_err(|e| StoreError::Backend(format!("invoice {}: {e}", row.invoice_id)))?;

        Ok(InvoiceItem {
            product_id: ProductId::from_uuid(row.product_id),
            product_code: row.product_code,
            product_description: row.product_description,
            quantity,
        })
    }
}
