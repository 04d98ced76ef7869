//! HTTP adapter for the Stock service API.
//!
//! Every call goes through a shared [`ResiliencePipeline`]. Status handling:
//!
//! | Call   | Status                        | Outcome                         |
//! |--------|-------------------------------|---------------------------------|
//! | lookup | 2xx                           | `Some(product)`                 |
//! | lookup | 408, 429, 5xx, transport      | transient (retried, counted)    |
//! | lookup | other non-2xx                 | `None`                          |
//! | adjust | 2xx                           | `Ok(())`                        |
//! | adjust | 404                           | `NotFound`                      |
//! | adjust | 422                           | `InsufficientStock`             |
//! | adjust | 409, 408, 429, 5xx, transport | transient (retried, counted)    |
//! | adjust | other 4xx                     | `Communication`                 |

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

use stockbill_core::ProductId;

use super::{RemoteProduct, StockCapability, StockClientError};
use crate::resilience::{
    Classify, FailureKind, ResilienceConfig, ResilienceError, ResiliencePipeline,
};

/// Failure of a single HTTP attempt, before the pipeline decides what to do.
#[derive(Debug, Error)]
enum AttemptError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("stock service responded {status}: {message}")]
    Status { status: StatusCode, message: String },
}

impl Classify for AttemptError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            AttemptError::Transport(e) if e.is_decode() => FailureKind::Permanent,
            AttemptError::Transport(_) => FailureKind::Transient,
            AttemptError::Status { status, .. } if is_transient_status(*status) => {
                FailureKind::Transient
            }
            AttemptError::Status { .. } => FailureKind::Permanent,
        }
    }
}

/// Lookup: server faults and throttling. Any other non-2xx means "not found".
fn is_transient_lookup_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

/// Adjust: as lookup, plus 409 (the stock service lost its version race).
fn is_transient_status(status: StatusCode) -> bool {
    is_transient_lookup_status(status) || status == StatusCode::CONFLICT
}

enum Lookup {
    Found(RemoteProduct),
    Missing(StatusCode),
}

#[derive(Serialize)]
struct AdjustStockBody {
    quantity: Decimal,
}

/// Stock client speaking to `GET /api/products/{id}` and
/// `PATCH /api/products/{id}/stock`.
#[derive(Debug, Clone)]
pub struct HttpStockClient {
    http: Client,
    base_url: String,
    pipeline: ResiliencePipeline,
}

impl HttpStockClient {
    pub fn new(base_url: impl Into<String>, config: &ResilienceConfig) -> Result<Self, StockClientError> {
        let http = Client::builder()
            .timeout(config.attempt_timeout)
            .connect_timeout(config.attempt_timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(|e| StockClientError::Communication {
                message: "failed to build HTTP client".to_string(),
                source: Some(Box::new(e)),
            })?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            pipeline: ResiliencePipeline::new("stock-service", config),
        })
    }

    pub fn pipeline(&self) -> &ResiliencePipeline {
        &self.pipeline
    }

    fn product_url(&self, product_id: ProductId) -> String {
        format!("{}/api/products/{}", self.base_url, product_id)
    }
}

#[async_trait]
impl StockCapability for HttpStockClient {
    #[instrument(skip_all, fields(product_id = %product_id))]
    async fn lookup_product(
        &self,
        product_id: ProductId,
    ) -> Result<Option<RemoteProduct>, StockClientError> {
        tracing::debug!("looking up product");
        let url = self.product_url(product_id);

        let outcome = self
            .pipeline
            .execute("lookup_product", || {
                let request = self.http.get(&url);
                async move {
                    let response = request.send().await?;
                    let status = response.status();
                    if status.is_success() {
                        return Ok(Lookup::Found(response.json::<RemoteProduct>().await?));
                    }
                    if is_transient_lookup_status(status) {
                        return Err(AttemptError::Status {
                            status,
                            message: remote_message(response).await,
                        });
                    }
                    Ok::<_, AttemptError>(Lookup::Missing(status))
                }
            })
            .await;

        match outcome {
            Ok(Lookup::Found(product)) => Ok(Some(product)),
            Ok(Lookup::Missing(status)) => {
                tracing::warn!(status = status.as_u16(), "product not found in stock service");
                Ok(None)
            }
            Err(e) => Err(into_client_error(product_id, "lookup_product", e)),
        }
    }

    #[instrument(skip_all, fields(product_id = %product_id, delta = %delta))]
    async fn adjust_stock(
        &self,
        product_id: ProductId,
        delta: Decimal,
    ) -> Result<(), StockClientError> {
        let url = format!("{}/stock", self.product_url(product_id));
        let body = AdjustStockBody { quantity: delta };

        let outcome = self
            .pipeline
            .execute("adjust_stock", || {
                let request = self.http.patch(&url).json(&body);
                async move {
                    let response = request.send().await?;
                    let status = response.status();
                    if status.is_success() {
                        return Ok(());
                    }
                    Err::<(), _>(AttemptError::Status {
                        status,
                        message: remote_message(response).await,
                    })
                }
            })
            .await;

        match outcome {
            Ok(()) => {
                tracing::debug!("stock adjusted");
                Ok(())
            }
            Err(ResilienceError::Failed(AttemptError::Status { status, .. }))
                if status == StatusCode::NOT_FOUND =>
            {
                Err(StockClientError::NotFound(product_id))
            }
            Err(ResilienceError::Failed(AttemptError::Status { status, message }))
                if status == StatusCode::UNPROCESSABLE_ENTITY =>
            {
                Err(StockClientError::InsufficientStock { product_id, message })
            }
            Err(e) => Err(into_client_error(product_id, "adjust_stock", e)),
        }
    }
}

fn into_client_error(
    product_id: ProductId,
    operation: &str,
    err: ResilienceError<AttemptError>,
) -> StockClientError {
    match err {
        ResilienceError::CircuitOpen => {
            tracing::error!(%product_id, operation, "stock service circuit is open");
            StockClientError::ServiceUnavailable
        }
        ResilienceError::Failed(e) => {
            tracing::error!(%product_id, operation, error = %e, "stock service call failed");
            StockClientError::Communication {
                message: e.to_string(),
                source: Some(Box::new(e)),
            }
        }
    }
}

/// Best-effort extraction of `message` from an `{"error", "message"}` body.
async fn remote_message(response: reqwest::Response) -> String {
    let body = response.text().await.unwrap_or_default();
    serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use axum::extract::{Path, State};
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::{get, patch};
    use axum::{Json, Router};

    use crate::resilience::{CircuitBreakerConfig, RetryPolicy, State as BreakerState};

    #[derive(Clone)]
    struct Stub {
        calls: Arc<AtomicU32>,
        lookup_status: u16,
        adjust_status: u16,
        product: RemoteProduct,
    }

    async fn stub_lookup(State(stub): State<Stub>, Path(_id): Path<String>) -> axum::response::Response {
        use axum::response::IntoResponse;
        stub.calls.fetch_add(1, Ordering::SeqCst);
        let status = AxumStatus::from_u16(stub.lookup_status).unwrap();
        if status.is_success() {
            (status, Json(stub.product.clone())).into_response()
        } else {
            status.into_response()
        }
    }

    async fn stub_adjust(State(stub): State<Stub>, Path(_id): Path<String>) -> axum::response::Response {
        use axum::response::IntoResponse;
        stub.calls.fetch_add(1, Ordering::SeqCst);
        let status = AxumStatus::from_u16(stub.adjust_status).unwrap();
        let body = serde_json::json!({"error": "insufficient_stock", "message": "only 1 left"});
        (status, Json(body)).into_response()
    }

    async fn spawn_stub(lookup_status: u16, adjust_status: u16) -> (String, Stub) {
        let stub = Stub {
            calls: Arc::new(AtomicU32::new(0)),
            lookup_status,
            adjust_status,
            product: RemoteProduct {
                id: ProductId::new(),
                code: "P-001".to_string(),
                description: "Widget".to_string(),
                stock: Decimal::from(10),
            },
        };
        let app = Router::new()
            .route("/api/products/:id", get(stub_lookup))
            .route("/api/products/:id/stock", patch(stub_adjust))
            .with_state(stub.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), stub)
    }

    fn fast_config() -> ResilienceConfig {
        ResilienceConfig {
            retry: RetryPolicy::exponential(3, Duration::from_millis(5)),
            circuit_breaker: CircuitBreakerConfig {
                break_duration: Duration::from_millis(200),
                ..Default::default()
            },
            attempt_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn lookup_returns_the_product() {
        let (url, stub) = spawn_stub(200, 204).await;
        let client = HttpStockClient::new(url, &fast_config()).unwrap();

        let found = client.lookup_product(stub.product.id).await.unwrap();
        assert_eq!(found, Some(stub.product.clone()));
    }

    #[tokio::test]
    async fn lookup_treats_client_errors_as_absent() {
        let (url, stub) = spawn_stub(404, 204).await;
        let client = HttpStockClient::new(url, &fast_config()).unwrap();

        assert_eq!(client.lookup_product(ProductId::new()).await.unwrap(), None);
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn lookup_conflict_is_absent_and_not_retried() {
        let (url, stub) = spawn_stub(409, 204).await;
        let client = HttpStockClient::new(url, &fast_config()).unwrap();

        assert_eq!(client.lookup_product(ProductId::new()).await.unwrap(), None);
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.pipeline().breaker().metrics().total_failures, 0);
    }

    #[tokio::test]
    async fn adjust_conflict_is_retried() {
        let (url, stub) = spawn_stub(200, 409).await;
        let client = HttpStockClient::new(url, &fast_config()).unwrap();

        let err = client.adjust_stock(ProductId::new(), Decimal::ONE).await.unwrap_err();
        assert_eq!(err.kind(), "communication_error");
        assert_eq!(stub.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn adjust_maps_business_rejections() {
        let (url, _) = spawn_stub(200, 422).await;
        let client = HttpStockClient::new(url, &fast_config()).unwrap();
        match client.adjust_stock(ProductId::new(), Decimal::from(-5)).await {
            Err(StockClientError::InsufficientStock { message, .. }) => {
                assert_eq!(message, "only 1 left")
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }

        let (url, stub) = spawn_stub(200, 404).await;
        let client = HttpStockClient::new(url, &fast_config()).unwrap();
        let err = client.adjust_stock(ProductId::new(), Decimal::ONE).await.unwrap_err();
        assert!(matches!(err, StockClientError::NotFound(_)));
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1, "business errors are not retried");
        assert_eq!(client.pipeline().breaker().state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn server_errors_are_retried_then_trip_the_circuit() {
        let (url, stub) = spawn_stub(503, 500).await;
        let client = HttpStockClient::new(url, &fast_config()).unwrap();

        let err = client.lookup_product(ProductId::new()).await.unwrap_err();
        assert!(matches!(err, StockClientError::Communication { .. }));
        assert_eq!(stub.calls.load(Ordering::SeqCst), 3);
        assert_eq!(client.pipeline().breaker().state(), BreakerState::Open);

        let err = client.adjust_stock(ProductId::new(), Decimal::ONE).await.unwrap_err();
        assert!(matches!(err, StockClientError::ServiceUnavailable));
        assert_eq!(stub.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unreachable_service_is_a_communication_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = HttpStockClient::new(format!("http://{addr}"), &fast_config()).unwrap();
        let err = client.lookup_product(ProductId::new()).await.unwrap_err();
        assert_eq!(err.kind(), "communication_error");
    }
}
