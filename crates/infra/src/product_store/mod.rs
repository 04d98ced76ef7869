//! Product persistence for the stock service.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryProductRepository;
pub use postgres::PostgresProductRepository;
pub use r#trait::ProductRepository;
