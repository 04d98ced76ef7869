//! HTTP surface for the billing and stock services.

pub mod app;
