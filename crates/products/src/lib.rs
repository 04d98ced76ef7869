//! Products domain module (stock side).
//!
//! This crate contains business rules for products and their stock balance,
//! implemented purely as deterministic domain logic (no IO, no HTTP, no storage).

pub mod product;

pub use product::{
    AdjustStock, CreateProduct, MAX_CODE_LEN, MAX_DESCRIPTION_LEN, Product, UpdateProduct,
};
