//! `stockbill-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod aggregate;
pub mod error;
pub mod id;
pub mod value_object;

pub use aggregate::{AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult};
pub use id::{InvoiceId, ProductId};
pub use value_object::{ensure_decimal_scale, Quantity, ValueObject, MAX_DECIMAL_SCALE};
