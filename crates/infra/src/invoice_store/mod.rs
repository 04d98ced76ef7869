//! Invoice persistence boundary.
//!
//! The workflow depends on [`InvoiceStore`] only; in-memory and Postgres
//! adapters are interchangeable behind it.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryInvoiceStore;
pub use postgres::PostgresInvoiceStore;
pub use r#trait::InvoiceStore;
