use std::str::FromStr;

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use stockbill_infra::{StockServiceError, WorkflowError};

/// HTTP status for a machine error code shared by both services.
pub fn status_for_kind(kind: &str) -> StatusCode {
    match kind {
        "validation_error" => StatusCode::BAD_REQUEST,
        "not_found" => StatusCode::NOT_FOUND,
        "already_closed" | "invalid_state" | "conflict" | "duplicate_code" => StatusCode::CONFLICT,
        "insufficient_stock" => StatusCode::UNPROCESSABLE_ENTITY,
        "stock_update_failed" | "communication_error" => StatusCode::BAD_GATEWAY,
        "service_unavailable" => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn workflow_error_to_response(err: WorkflowError) -> axum::response::Response {
    let kind = err.kind();
    let status = status_for_kind(kind);
    if status.is_server_error() {
        tracing::error!(error = %err, kind, "invoice request failed");
    }
    json_error(status, kind, err.to_string())
}

pub fn stock_error_to_response(err: StockServiceError) -> axum::response::Response {
    let kind = err.kind();
    let status = status_for_kind(kind);
    if status.is_server_error() {
        tracing::error!(error = %err, kind, "product request failed");
    }
    json_error(status, kind, err.to_string())
}

/// Malformed bodies are client errors; axum's default would answer 422, which
/// this API reserves for insufficient stock.
pub fn json_rejection(rejection: JsonRejection) -> axum::response::Response {
    json_error(
        StatusCode::BAD_REQUEST,
        "validation_error",
        rejection.body_text(),
    )
}

pub fn parse_id<T: FromStr>(raw: &str) -> Result<T, axum::response::Response>
where
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()))
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
