//! Invoice lifecycle orchestration across the invoice store and the remote
//! stock capability.
//!
//! - **create**: validate every line against live stock (sequential, fail-fast),
//!   then persist with the next invoice number.
//! - **print**: decrement stock for every line concurrently, close the invoice
//!   only if every decrement succeeded. Decrements that did succeed are not
//!   reversed when another one fails; the invoice stays open and the failure
//!   lists the affected lines.
//! - **delete**: only while open.

use chrono::Utc;
use futures::future::join_all;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::instrument;

use stockbill_core::{DomainError, ExpectedVersion, InvoiceId, ProductId, Quantity};
use stockbill_invoicing::{Invoice, InvoiceItem, InvoiceStatus, OpenInvoice};

use crate::invoice_store::InvoiceStore;
use crate::stock_client::{StockCapability, StockClientError};
use crate::store_error::StoreError;

const DEFAULT_NUMBER_ATTEMPTS: u32 = 5;

/// One line of a create request, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceLineRequest {
    pub product_id: ProductId,
    pub quantity: Decimal,
}

/// A line whose stock decrement failed during print.
#[derive(Debug)]
pub struct StockUpdateFailure {
    pub product_id: ProductId,
    pub product_code: String,
    pub quantity: Quantity,
    pub cause: StockClientError,
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invoice {0} not found")]
    InvoiceNotFound(InvoiceId),

    #[error("product {0} not found")]
    ProductNotFound(ProductId),

    #[error(
        "insufficient stock for product {product_id} ({description}): available {available}, requested {requested}"
    )]
    InsufficientStock {
        product_id: ProductId,
        description: String,
        available: Decimal,
        requested: Decimal,
    },

    #[error("invoice {number} has already been printed")]
    AlreadyClosed { number: u64 },

    #[error("invoice {number} is {} and cannot be deleted", .status.as_str())]
    InvalidState { number: u64, status: InvoiceStatus },

    #[error("failed to update stock for invoice {number}: {}", describe_failures(.failures))]
    StockUpdate {
        number: u64,
        failures: Vec<StockUpdateFailure>,
    },

    #[error("stock service is temporarily unavailable")]
    ServiceUnavailable,

    #[error("communication with stock service failed for product {product_id}: {source}")]
    Communication {
        product_id: ProductId,
        #[source]
        source: StockClientError,
    },

    #[error("concurrency conflict: {0}")]
    Conflict(String),

    #[error("invoice storage failure: {0}")]
    Store(StoreError),
}

impl WorkflowError {
    /// Stable machine-readable code.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowError::Validation(_) => "validation_error",
            WorkflowError::InvoiceNotFound(_) | WorkflowError::ProductNotFound(_) => "not_found",
            WorkflowError::InsufficientStock { .. } => "insufficient_stock",
            WorkflowError::AlreadyClosed { .. } => "already_closed",
            WorkflowError::InvalidState { .. } => "invalid_state",
            WorkflowError::StockUpdate { .. } => "stock_update_failed",
            WorkflowError::ServiceUnavailable => "service_unavailable",
            WorkflowError::Communication { .. } => "communication_error",
            WorkflowError::Conflict(_) => "conflict",
            WorkflowError::Store(_) => "store_error",
        }
    }

    fn from_lookup(product_id: ProductId, err: StockClientError) -> Self {
        match err {
            StockClientError::ServiceUnavailable => WorkflowError::ServiceUnavailable,
            StockClientError::NotFound(_) => WorkflowError::ProductNotFound(product_id),
            other => WorkflowError::Communication {
                product_id,
                source: other,
            },
        }
    }
}

impl From<StoreError> for WorkflowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => WorkflowError::Conflict(msg),
            other => WorkflowError::Store(other),
        }
    }
}

fn describe_failures(failures: &[StockUpdateFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({}): {}", f.product_code, f.product_id, f.cause))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Invoice Workflow Engine.
pub struct InvoiceWorkflow<S, C> {
    store: S,
    stock: C,
    max_number_attempts: u32,
}

impl<S, C> InvoiceWorkflow<S, C>
where
    S: InvoiceStore,
    C: StockCapability,
{
    pub fn new(store: S, stock: C) -> Self {
        Self {
            store,
            stock,
            max_number_attempts: DEFAULT_NUMBER_ATTEMPTS,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn list(&self) -> Result<Vec<Invoice>, WorkflowError> {
        Ok(self.store.list_all().await?)
    }

    pub async fn get(&self, id: InvoiceId) -> Result<Invoice, WorkflowError> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or(WorkflowError::InvoiceNotFound(id))
    }

    #[instrument(skip(self, lines), fields(lines = lines.len()))]
    pub async fn create(&self, lines: Vec<InvoiceLineRequest>) -> Result<Invoice, WorkflowError> {
        if lines.is_empty() {
            return Err(WorkflowError::Validation(
                "an invoice must contain at least one item".to_string(),
            ));
        }

        let quantities = lines
            .iter()
            .map(|line| {
                Quantity::new(line.quantity).map_err(|e| {
                    WorkflowError::Validation(format!("product {}: {e}", line.product_id))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut items = Vec::with_capacity(lines.len());
        for (line, quantity) in lines.iter().zip(quantities) {
            let product = self
                .stock
                .lookup_product(line.product_id)
                .await
                .map_err(|e| WorkflowError::from_lookup(line.product_id, e))?
                .ok_or(WorkflowError::ProductNotFound(line.product_id))?;

            if product.stock < quantity.value() {
                tracing::info!(
                    product_id = %line.product_id,
                    available = %product.stock,
                    requested = %quantity,
                    "invoice rejected: insufficient stock"
                );
                return Err(WorkflowError::InsufficientStock {
                    product_id: line.product_id,
                    description: product.description,
                    available: product.stock,
                    requested: quantity.value(),
                });
            }

            items.push(InvoiceItem {
                product_id: line.product_id,
                product_code: product.code,
                product_description: product.description,
                quantity,
            });
        }

        let number = self.store.next_invoice_number().await?;
        let mut invoice = Invoice::open(OpenInvoice {
            invoice_id: InvoiceId::new(),
            number,
            items,
            occurred_at: Utc::now(),
        })
        .map_err(domain_to_workflow)?;

        for attempt in 1..=self.max_number_attempts {
            match self.store.save(&invoice, ExpectedVersion::Exact(0)).await {
                Ok(saved) => {
                    tracing::info!(
                        invoice_id = %saved.id_typed(),
                        invoice_number = saved.number(),
                        items = saved.items().len(),
                        "invoice created"
                    );
                    return Ok(saved);
                }
                Err(StoreError::Duplicate(what)) if attempt < self.max_number_attempts => {
                    let next = self.store.next_invoice_number().await?;
                    tracing::warn!(attempt, taken = %what, next, "invoice number taken, reassigning");
                    invoice = invoice.renumbered(next);
                }
                Err(StoreError::Duplicate(what)) => {
                    return Err(WorkflowError::Conflict(format!(
                        "could not assign a unique invoice number ({what})"
                    )));
                }
                Err(other) => return Err(other.into()),
            }
        }

        Err(WorkflowError::Conflict(
            "could not assign a unique invoice number".to_string(),
        ))
    }

    #[instrument(skip(self), fields(invoice_id = %id))]
    pub async fn print(&self, id: InvoiceId) -> Result<Invoice, WorkflowError> {
        let mut invoice = self.get(id).await?;
        let number = invoice.number();

        if !invoice.is_open() {
            return Err(WorkflowError::AlreadyClosed { number });
        }

        tracing::info!(invoice_number = number, items = invoice.items().len(), "printing invoice");

        let outcomes = join_all(invoice.items().iter().map(|item| self.consume(number, item))).await;
        let failures: Vec<StockUpdateFailure> = outcomes.into_iter().filter_map(Result::err).collect();

        if !failures.is_empty() {
            tracing::error!(
                invoice_number = number,
                failed = failures.len(),
                "print failed; invoice remains open and applied decrements are not reversed"
            );
            return Err(WorkflowError::StockUpdate { number, failures });
        }

        invoice.close(Utc::now()).map_err(|e| match e {
            DomainError::Conflict(_) => WorkflowError::AlreadyClosed { number },
            other => domain_to_workflow(other),
        })?;

        let saved = self
            .store
            .save(&invoice, ExpectedVersion::of(&invoice))
            .await
            .map_err(|e| match e {
                StoreError::NotFound => WorkflowError::InvoiceNotFound(id),
                other => other.into(),
            })?;

        tracing::info!(invoice_number = number, "invoice printed");
        Ok(saved)
    }

    #[instrument(skip(self), fields(invoice_id = %id))]
    pub async fn delete(&self, id: InvoiceId) -> Result<(), WorkflowError> {
        let invoice = self.get(id).await?;

        if invoice.ensure_deletable().is_err() {
            return Err(WorkflowError::InvalidState {
                number: invoice.number(),
                status: invoice.status(),
            });
        }

        self.store.delete(&invoice).await.map_err(|e| match e {
            StoreError::NotFound => WorkflowError::InvoiceNotFound(id),
            other => other.into(),
        })?;

        tracing::info!(invoice_number = invoice.number(), "invoice deleted");
        Ok(())
    }

    async fn consume(&self, number: u64, item: &InvoiceItem) -> Result<(), StockUpdateFailure> {
        match self
            .stock
            .adjust_stock(item.product_id, item.quantity.as_consumption())
            .await
        {
            Ok(()) => {
                tracing::info!(
                    invoice_number = number,
                    product_id = %item.product_id,
                    quantity = %item.quantity,
                    "stock decremented"
                );
                Ok(())
            }
            Err(cause) => {
                tracing::error!(
                    invoice_number = number,
                    product_id = %item.product_id,
                    quantity = %item.quantity,
                    error = %cause,
                    "stock decrement failed"
                );
                Err(StockUpdateFailure {
                    product_id: item.product_id,
                    product_code: item.product_code.clone(),
                    quantity: item.quantity,
                    cause,
                })
            }
        }
    }
}

fn domain_to_workflow(err: DomainError) -> WorkflowError {
    match err {
        DomainError::Conflict(msg) => WorkflowError::Conflict(msg),
        other => WorkflowError::Validation(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use stockbill_core::AggregateRoot;

    use crate::invoice_store::InMemoryInvoiceStore;
    use crate::stock_client::RemoteProduct;

    /// In-process stand-in for the stock service.
    #[derive(Default)]
    struct FakeStock {
        products: Mutex<HashMap<ProductId, RemoteProduct>>,
        failing: Mutex<HashSet<ProductId>>,
        unavailable: Mutex<bool>,
    }

    impl FakeStock {
        fn add(&self, code: &str, stock: i64) -> ProductId {
            let id = ProductId::new();
            self.products.lock().unwrap().insert(
                id,
                RemoteProduct {
                    id,
                    code: code.to_string(),
                    description: format!("{code} description"),
                    stock: Decimal::from(stock),
                },
            );
            id
        }

        fn stock_of(&self, id: ProductId) -> Decimal {
            self.products.lock().unwrap()[&id].stock
        }

        fn fail_adjustments_for(&self, id: ProductId) {
            self.failing.lock().unwrap().insert(id);
        }
    }

    #[async_trait]
    impl StockCapability for FakeStock {
        async fn lookup_product(
            &self,
            product_id: ProductId,
        ) -> Result<Option<RemoteProduct>, StockClientError> {
            if *self.unavailable.lock().unwrap() {
                return Err(StockClientError::ServiceUnavailable);
            }
            Ok(self.products.lock().unwrap().get(&product_id).cloned())
        }

        async fn adjust_stock(
            &self,
            product_id: ProductId,
            delta: Decimal,
        ) -> Result<(), StockClientError> {
            if self.failing.lock().unwrap().contains(&product_id) {
                return Err(StockClientError::communication("connection reset"));
            }
            let mut products = self.products.lock().unwrap();
            let product = products
                .get_mut(&product_id)
                .ok_or(StockClientError::NotFound(product_id))?;
            if product.stock + delta < Decimal::ZERO {
                return Err(StockClientError::InsufficientStock {
                    product_id,
                    message: "not enough".to_string(),
                });
            }
            product.stock += delta;
            Ok(())
        }
    }

    type Workflow = InvoiceWorkflow<Arc<InMemoryInvoiceStore>, Arc<FakeStock>>;

    fn setup() -> (Workflow, Arc<FakeStock>) {
        let stock = Arc::new(FakeStock::default());
        let workflow = InvoiceWorkflow::new(Arc::new(InMemoryInvoiceStore::new()), stock.clone());
        (workflow, stock)
    }

    fn line(product_id: ProductId, quantity: i64) -> InvoiceLineRequest {
        InvoiceLineRequest {
            product_id,
            quantity: Decimal::from(quantity),
        }
    }

    async fn stored_count(workflow: &Workflow) -> usize {
        workflow.list().await.unwrap().len()
    }

    #[tokio::test]
    async fn empty_request_is_a_validation_error_and_persists_nothing() {
        let (workflow, _) = setup();
        let err = workflow.create(vec![]).await.unwrap_err();
        assert_eq!(err.kind(), "validation_error");
        assert_eq!(stored_count(&workflow).await, 0);
    }

    #[tokio::test]
    async fn non_positive_quantity_is_rejected_before_any_lookup() {
        let (workflow, stock) = setup();
        *stock.unavailable.lock().unwrap() = true;

        let err = workflow
            .create(vec![line(ProductId::new(), 0)])
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));
    }

    #[tokio::test]
    async fn insufficient_stock_names_the_product_and_persists_nothing() {
        let (workflow, stock) = setup();
        let ok = stock.add("A", 10);
        let short = stock.add("B", 2);

        let err = workflow
            .create(vec![line(ok, 1), line(short, 3)])
            .await
            .unwrap_err();

        match err {
            WorkflowError::InsufficientStock {
                product_id,
                available,
                requested,
                ..
            } => {
                assert_eq!(product_id, short);
                assert_eq!(available, Decimal::from(2));
                assert_eq!(requested, Decimal::from(3));
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }
        assert_eq!(stored_count(&workflow).await, 0);
    }

    #[tokio::test]
    async fn unknown_product_is_not_found() {
        let (workflow, _) = setup();
        let missing = ProductId::new();
        let err = workflow.create(vec![line(missing, 1)]).await.unwrap_err();
        assert!(matches!(err, WorkflowError::ProductNotFound(id) if id == missing));
        assert_eq!(stored_count(&workflow).await, 0);
    }

    #[tokio::test]
    async fn open_circuit_surfaces_as_service_unavailable() {
        let (workflow, stock) = setup();
        let id = stock.add("A", 10);
        *stock.unavailable.lock().unwrap() = true;

        let err = workflow.create(vec![line(id, 1)]).await.unwrap_err();
        assert_eq!(err.kind(), "service_unavailable");
    }

    #[tokio::test]
    async fn create_then_print_decrements_stock_and_closes() {
        let (workflow, stock) = setup();
        let id = stock.add("P-1", 10);

        let invoice = workflow.create(vec![line(id, 5)]).await.unwrap();
        assert_eq!(invoice.number(), 1);
        assert_eq!(invoice.status(), InvoiceStatus::Open);
        assert_eq!(invoice.items()[0].product_code, "P-1");
        assert_eq!(invoice.items()[0].product_description, "P-1 description");
        assert_eq!(stock.stock_of(id), Decimal::from(10), "create must not touch stock");

        let printed = workflow.print(invoice.id_typed()).await.unwrap();
        assert_eq!(printed.status(), InvoiceStatus::Closed);
        assert!(printed.printed_at().is_some());
        assert_eq!(stock.stock_of(id), Decimal::from(5));
    }

    #[tokio::test]
    async fn numbers_continue_from_the_highest_existing() {
        let (workflow, stock) = setup();
        let id = stock.add("P-1", 100);

        let first = workflow.create(vec![line(id, 1)]).await.unwrap();
        let second = workflow.create(vec![line(id, 1)]).await.unwrap();
        assert_eq!(second.number(), first.number() + 1);

        let numbers: Vec<u64> = workflow.list().await.unwrap().iter().map(Invoice::number).collect();
        assert_eq!(numbers, vec![2, 1]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creations_get_distinct_numbers() {
        let (workflow, stock) = setup();
        let id = stock.add("P-1", 1_000);
        let workflow = Arc::new(workflow);

        let handles: Vec<_> = (0..25)
            .map(|_| {
                let workflow = workflow.clone();
                tokio::spawn(async move { workflow.create(vec![line(id, 1)]).await })
            })
            .collect();

        let mut numbers = HashSet::new();
        for handle in handles {
            let invoice = handle.await.unwrap().unwrap();
            assert!(numbers.insert(invoice.number()), "duplicate number {}", invoice.number());
        }
        assert_eq!(numbers.len(), 25);
    }

    #[tokio::test]
    async fn printing_a_closed_invoice_is_rejected_and_changes_nothing() {
        let (workflow, stock) = setup();
        let id = stock.add("P-1", 10);
        let invoice = workflow.create(vec![line(id, 2)]).await.unwrap();
        let printed = workflow.print(invoice.id_typed()).await.unwrap();

        let err = workflow.print(invoice.id_typed()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::AlreadyClosed { number } if number == invoice.number()));
        assert_eq!(stock.stock_of(id), Decimal::from(8));
        assert_eq!(workflow.get(invoice.id_typed()).await.unwrap(), printed);
    }

    #[tokio::test]
    async fn partial_stock_failure_keeps_the_invoice_open() {
        let (workflow, stock) = setup();
        let good = stock.add("GOOD", 10);
        let bad = stock.add("BAD", 10);
        let invoice = workflow
            .create(vec![line(good, 4), line(bad, 1)])
            .await
            .unwrap();
        stock.fail_adjustments_for(bad);

        let err = workflow.print(invoice.id_typed()).await.unwrap_err();
        match &err {
            WorkflowError::StockUpdate { number, failures } => {
                assert_eq!(*number, invoice.number());
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].product_id, bad);
                assert_eq!(failures[0].cause.kind(), "communication_error");
            }
            other => panic!("expected StockUpdate, got {other:?}"),
        }
        assert_eq!(err.kind(), "stock_update_failed");

        let reloaded = workflow.get(invoice.id_typed()).await.unwrap();
        assert_eq!(reloaded.status(), InvoiceStatus::Open);
        assert!(reloaded.printed_at().is_none());
        // Applied decrements are not reversed.
        assert_eq!(stock.stock_of(good), Decimal::from(6));
        assert_eq!(stock.stock_of(bad), Decimal::from(10));
    }

    #[tokio::test]
    async fn print_missing_invoice_is_not_found() {
        let (workflow, _) = setup();
        let err = workflow.print(InvoiceId::new()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::InvoiceNotFound(_)));
    }

    #[tokio::test]
    async fn deleting_an_open_invoice_removes_it() {
        let (workflow, stock) = setup();
        let id = stock.add("P-1", 10);
        let invoice = workflow.create(vec![line(id, 1)]).await.unwrap();

        workflow.delete(invoice.id_typed()).await.unwrap();
        let err = workflow.get(invoice.id_typed()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::InvoiceNotFound(_)));
    }

    #[tokio::test]
    async fn deleting_a_closed_invoice_is_an_invalid_state() {
        let (workflow, stock) = setup();
        let id = stock.add("P-1", 10);
        let invoice = workflow.create(vec![line(id, 1)]).await.unwrap();
        workflow.print(invoice.id_typed()).await.unwrap();

        let err = workflow.delete(invoice.id_typed()).await.unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::InvalidState { status: InvoiceStatus::Closed, .. }
        ));
        assert!(workflow.get(invoice.id_typed()).await.is_ok());
    }

    /// Closes a rival copy of the invoice in the store during the first
    /// adjustment, so the printing workflow saves a stale version.
    struct RacingStock {
        inner: Arc<FakeStock>,
        store: Arc<InMemoryInvoiceStore>,
        rival: Mutex<Option<Invoice>>,
    }

    #[async_trait]
    impl StockCapability for RacingStock {
        async fn lookup_product(
            &self,
            product_id: ProductId,
        ) -> Result<Option<RemoteProduct>, StockClientError> {
            self.inner.lookup_product(product_id).await
        }

        async fn adjust_stock(
            &self,
            product_id: ProductId,
            delta: Decimal,
        ) -> Result<(), StockClientError> {
            let rival = self.rival.lock().unwrap().take();
            if let Some(mut rival) = rival {
                rival.close(Utc::now()).unwrap();
                self.store
                    .save(&rival, ExpectedVersion::of(&rival))
                    .await
                    .unwrap();
            }
            self.inner.adjust_stock(product_id, delta).await
        }
    }

    #[tokio::test]
    async fn print_racing_another_writer_is_a_conflict() {
        let (workflow, stock) = setup();
        let id = stock.add("P-1", 10);
        let invoice = workflow.create(vec![line(id, 1)]).await.unwrap();

        let store = workflow.store().clone();
        let racing = InvoiceWorkflow::new(
            store.clone(),
            RacingStock {
                inner: stock.clone(),
                store: store.clone(),
                rival: Mutex::new(Some(invoice.clone())),
            },
        );

        let err = racing.print(invoice.id_typed()).await.unwrap_err();
        assert_eq!(err.kind(), "conflict");

        // the rival's write is the one that stuck
        let current = workflow.get(invoice.id_typed()).await.unwrap();
        assert_eq!(current.status(), InvoiceStatus::Closed);
        assert_eq!(current.version(), 2);
        // no compensation: the decrement made before the failed save stays applied
        assert_eq!(stock.stock_of(id), Decimal::from(9));
    }
}
