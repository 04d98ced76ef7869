use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use stockbill_core::InvoiceId;

use crate::app::services::BillingServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_invoices).post(create_invoice))
        .route("/:id", get(get_invoice).delete(delete_invoice))
        .route("/:id/print", post(print_invoice))
}

pub async fn list_invoices(
    Extension(services): Extension<Arc<BillingServices>>,
) -> axum::response::Response {
    match services.workflow.list().await {
        Ok(invoices) => {
            let body: Vec<dto::InvoiceResponse> =
                invoices.iter().map(dto::InvoiceResponse::from).collect();
            Json(body).into_response()
        }
        Err(e) => errors::workflow_error_to_response(e),
    }
}

pub async fn get_invoice(
    Extension(services): Extension<Arc<BillingServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: InvoiceId = match errors::parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.workflow.get(id).await {
        Ok(invoice) => Json(dto::InvoiceResponse::from(&invoice)).into_response(),
        Err(e) => errors::workflow_error_to_response(e),
    }
}

pub async fn create_invoice(
    Extension(services): Extension<Arc<BillingServices>>,
    body: Result<Json<dto::CreateInvoiceRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return errors::json_rejection(rejection),
    };

    let lines = body.items.into_iter().map(Into::into).collect();
    match services.workflow.create(lines).await {
        Ok(invoice) => (
            StatusCode::CREATED,
            Json(dto::InvoiceResponse::from(&invoice)),
        )
            .into_response(),
        Err(e) => errors::workflow_error_to_response(e),
    }
}

pub async fn print_invoice(
    Extension(services): Extension<Arc<BillingServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: InvoiceId = match errors::parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.workflow.print(id).await {
        Ok(invoice) => Json(dto::InvoiceResponse::from(&invoice)).into_response(),
        Err(e) => errors::workflow_error_to_response(e),
    }
}

pub async fn delete_invoice(
    Extension(services): Extension<Arc<BillingServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: InvoiceId = match errors::parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.workflow.delete(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::workflow_error_to_response(e),
    }
}
