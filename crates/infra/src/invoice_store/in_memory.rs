use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use stockbill_core::{AggregateRoot, ExpectedVersion, InvoiceId};
use stockbill_invoicing::Invoice;

use super::r#trait::InvoiceStore;
use crate::store_error::StoreError;

#[derive(Debug, Default)]
struct State {
    invoices: HashMap<InvoiceId, Invoice>,
    /// Highest number handed out, even if never saved.
    last_issued: u64,
}

/// In-memory invoice store.
///
/// Intended for tests/dev. Numbers are issued under the write lock as
/// `max(stored, issued) + 1`, so gaps are possible but duplicates are not.
#[derive(Debug, Default)]
pub struct InMemoryInvoiceStore {
    state: RwLock<State>,
}

impl InMemoryInvoiceStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> StoreError {
        StoreError::Backend("lock poisoned".to_string())
    }
}

#[async_trait]
impl InvoiceStore for InMemoryInvoiceStore {
    async fn next_invoice_number(&self) -> Result<u64, StoreError> {
        let mut state = self.state.write().map_err(|_| Self::poisoned())?;
        let stored_max = state
            .invoices
            .values()
            .map(Invoice::number)
            .max()
            .unwrap_or(0);
        let next = stored_max.max(state.last_issued) + 1;
        state.last_issued = next;
        Ok(next)
    }

    async fn save(
        &self,
        invoice: &Invoice,
        expected: ExpectedVersion,
    ) -> Result<Invoice, StoreError> {
        let mut state = self.state.write().map_err(|_| Self::poisoned())?;
        let id = invoice.id_typed();

        let current = state.invoices.get(&id).map(|existing| existing.version());
        match current {
            Some(actual) if !expected.matches(actual) => {
                return Err(StoreError::Conflict(format!(
                    "invoice {id}: expected {expected:?}, found version {actual}"
                )));
            }
            None if !expected.matches(0) => return Err(StoreError::NotFound),
            _ => {}
        }

        let number_taken = state
            .invoices
            .values()
            .any(|other| other.number() == invoice.number() && other.id_typed() != id);
        if number_taken {
            return Err(StoreError::Duplicate(format!(
                "invoice number {}",
                invoice.number()
            )));
        }

        let saved = invoice.clone().with_version(current.unwrap_or(0) + 1);
        state.invoices.insert(id, saved.clone());
        Ok(saved)
    }

    async fn find_by_id(&self, id: InvoiceId) -> Result<Option<Invoice>, StoreError> {
        let state = self.state.read().map_err(|_| Self::poisoned())?;
        Ok(state.invoices.get(&id).cloned())
    }

    async fn delete(&self, invoice: &Invoice) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| Self::poisoned())?;
        let id = invoice.id_typed();

        let Some(stored) = state.invoices.get(&id) else {
            return Err(StoreError::NotFound);
        };
        if stored.version() != invoice.version() {
            return Err(StoreError::Conflict(format!(
                "invoice {id} changed since it was loaded (version {} != {})",
                stored.version(),
                invoice.version()
            )));
        }

        state.invoices.remove(&id);
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<Invoice>, StoreError> {
        let state = self.state.read().map_err(|_| Self::poisoned())?;
        let mut invoices: Vec<Invoice> = state.invoices.values().cloned().collect();
        invoices.sort_by(|a, b| b.number().cmp(&a.number()));
        Ok(invoices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use stockbill_core::{ProductId, Quantity};
    use stockbill_invoicing::{InvoiceItem, OpenInvoice};

    fn new_invoice(number: u64) -> Invoice {
        Invoice::open(OpenInvoice {
            invoice_id: InvoiceId::new(),
            number,
            items: vec![InvoiceItem {
                product_id: ProductId::new(),
                product_code: "P-001".to_string(),
                product_description: "Widget".to_string(),
                quantity: Quantity::new(Decimal::ONE).unwrap(),
            }],
            occurred_at: Utc::now(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn numbers_follow_the_highest_stored_number() {
        let store = InMemoryInvoiceStore::new();
        assert_eq!(store.next_invoice_number().await.unwrap(), 1);

        store
            .save(&new_invoice(41), ExpectedVersion::Exact(0))
            .await
            .unwrap();
        assert_eq!(store.next_invoice_number().await.unwrap(), 42);
        assert_eq!(store.next_invoice_number().await.unwrap(), 43);
    }

    #[tokio::test]
    async fn duplicate_numbers_are_rejected() {
        let store = InMemoryInvoiceStore::new();
        store
            .save(&new_invoice(1), ExpectedVersion::Exact(0))
            .await
            .unwrap();

        let err = store
            .save(&new_invoice(1), ExpectedVersion::Exact(0))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
    }

    #[tokio::test]
    async fn stale_writes_conflict() {
        let store = InMemoryInvoiceStore::new();
        let saved = store
            .save(&new_invoice(1), ExpectedVersion::Exact(0))
            .await
            .unwrap();
        assert_eq!(saved.version(), 1);

        let mut first = saved.clone();
        first.close(Utc::now()).unwrap();
        let closed = store.save(&first, ExpectedVersion::of(&first)).await.unwrap();
        assert_eq!(closed.version(), 2);

        let mut second = saved;
        second.close(Utc::now()).unwrap();
        let err = store
            .save(&second, ExpectedVersion::of(&second))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let err = store.delete(&second).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn list_is_newest_first_and_delete_removes() {
        let store = InMemoryInvoiceStore::new();
        let mut saved = Vec::new();
        for n in [2, 5, 3] {
            saved.push(
                store
                    .save(&new_invoice(n), ExpectedVersion::Exact(0))
                    .await
                    .unwrap(),
            );
        }

        let numbers: Vec<u64> = store
            .list_all()
            .await
            .unwrap()
            .iter()
            .map(Invoice::number)
            .collect();
        assert_eq!(numbers, vec![5, 3, 2]);

        store.delete(&saved[1]).await.unwrap();
        assert!(store.find_by_id(saved[1].id_typed()).await.unwrap().is_none());
        assert!(matches!(
            store.delete(&saved[1]).await,
            Err(StoreError::NotFound)
        ));
    }
}
