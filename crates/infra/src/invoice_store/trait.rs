use std::sync::Arc;

use async_trait::async_trait;

use stockbill_core::{ExpectedVersion, InvoiceId};
use stockbill_invoicing::Invoice;

use crate::store_error::StoreError;

/// Persistence contract for invoices.
///
/// Implementations must:
/// - issue numbers from [`next_invoice_number`](Self::next_invoice_number) that
///   are greater than every number already stored and never issued twice;
/// - reject a second invoice with an existing number (`StoreError::Duplicate`);
/// - enforce `expected` on every write (`StoreError::Conflict` on mismatch);
/// - return invoices from [`list_all`](Self::list_all) by number, newest first.
#[async_trait]
pub trait InvoiceStore: Send + Sync {
    async fn next_invoice_number(&self) -> Result<u64, StoreError>;

    /// Insert (`ExpectedVersion::Exact(0)`) or update an invoice.
    ///
    /// Items are written on insert only. Returns the invoice stamped with its
    /// new version.
    async fn save(&self, invoice: &Invoice, expected: ExpectedVersion)
        -> Result<Invoice, StoreError>;

    async fn find_by_id(&self, id: InvoiceId) -> Result<Option<Invoice>, StoreError>;

    /// Delete an invoice together with its items, provided it is still at the
    /// version the caller loaded.
    async fn delete(&self, invoice: &Invoice) -> Result<(), StoreError>;

    async fn list_all(&self) -> Result<Vec<Invoice>, StoreError>;
}

#[async_trait]
impl<T> InvoiceStore for Arc<T>
where
    T: InvoiceStore + ?Sized,
{
    async fn next_invoice_number(&self) -> Result<u64, StoreError> {
        (**self).next_invoice_number().await
    }

    async fn save(
        &self,
        invoice: &Invoice,
        expected: ExpectedVersion,
    ) -> Result<Invoice, StoreError> {
        (**self).save(invoice, expected).await
    }

    async fn find_by_id(&self, id: InvoiceId) -> Result<Option<Invoice>, StoreError> {
        (**self).find_by_id(id).await
    }

    async fn delete(&self, invoice: &Invoice) -> Result<(), StoreError> {
        (**self).delete(invoice).await
    }

    async fn list_all(&self) -> Result<Vec<Invoice>, StoreError> {
        (**self).list_all().await
    }
}
