pub mod invoices;
pub mod products;
pub mod system;
