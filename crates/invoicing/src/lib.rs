//! Invoicing domain module.
//!
//! This crate contains business rules for invoices (numbering guard, item
//! snapshots, the one-way `Open -> Closed` transition), implemented purely as
//! deterministic domain logic (no IO, no HTTP, no storage).

pub mod invoice;

pub use invoice::{Invoice, InvoiceItem, InvoiceStatus, OpenInvoice};
