//! HTTP API application wiring (Axum routers + service wiring).
//!
//! - `services.rs`: store selection and service construction for each process
//! - `routes/`: HTTP routes + handlers (one file per service)
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::{BillingServices, StockServices};

/// Router for the billing process: invoices plus liveness.
pub fn build_billing_app(services: Arc<BillingServices>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/api/invoices", routes::invoices::router())
        .layer(ServiceBuilder::new().layer(Extension(services)))
}

/// Router for the stock process: products plus liveness.
pub fn build_stock_app(services: Arc<StockServices>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/api/products", routes::products::router())
        .layer(ServiceBuilder::new().layer(Extension(services)))
}

/// Resolves on Ctrl+C; passed to `axum::serve(..).with_graceful_shutdown`.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
