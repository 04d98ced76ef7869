//! Infrastructure layer: stores, the remote stock client, resilience, and the
//! application services that orchestrate them.

pub mod config;
pub mod invoice_store;
pub mod invoice_workflow;
pub mod product_store;
pub mod resilience;
pub mod stock_client;
pub mod stock_service;
pub mod store_error;

pub use invoice_workflow::{InvoiceLineRequest, InvoiceWorkflow, StockUpdateFailure, WorkflowError};
pub use stock_service::{ProductDetails, StockService, StockServiceError};
pub use store_error::StoreError;
