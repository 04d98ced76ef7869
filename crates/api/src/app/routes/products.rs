use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch},
    Json, Router,
};

use stockbill_core::ProductId;

use crate::app::services::StockServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_products).post(create_product))
        .route(
            "/:id",
            get(get_product).put(update_product).delete(delete_product),
        )
        .route("/:id/stock", patch(adjust_stock))
}

pub async fn list_products(
    Extension(services): Extension<Arc<StockServices>>,
) -> axum::response::Response {
    match services.stock.list_products().await {
        Ok(products) => {
            let body: Vec<dto::ProductResponse> =
                products.iter().map(dto::ProductResponse::from).collect();
            Json(body).into_response()
        }
        Err(e) => errors::stock_error_to_response(e),
    }
}

pub async fn get_product(
    Extension(services): Extension<Arc<StockServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: ProductId = match errors::parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.stock.get_product(id).await {
        Ok(product) => Json(dto::ProductResponse::from(&product)).into_response(),
        Err(e) => errors::stock_error_to_response(e),
    }
}

pub async fn create_product(
    Extension(services): Extension<Arc<StockServices>>,
    body: Result<Json<dto::ProductRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return errors::json_rejection(rejection),
    };

    match services.stock.create_product(body.into()).await {
        Ok(product) => (
            StatusCode::CREATED,
            Json(dto::ProductResponse::from(&product)),
        )
            .into_response(),
        Err(e) => errors::stock_error_to_response(e),
    }
}

pub async fn update_product(
    Extension(services): Extension<Arc<StockServices>>,
    Path(id): Path<String>,
    body: Result<Json<dto::ProductRequest>, JsonRejection>,
) -> axum::response::Response {
    let id: ProductId = match errors::parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return errors::json_rejection(rejection),
    };

    match services.stock.update_product(id, body.into()).await {
        Ok(product) => Json(dto::ProductResponse::from(&product)).into_response(),
        Err(e) => errors::stock_error_to_response(e),
    }
}

pub async fn adjust_stock(
    Extension(services): Extension<Arc<StockServices>>,
    Path(id): Path<String>,
    body: Result<Json<dto::AdjustStockRequest>, JsonRejection>,
) -> axum::response::Response {
    let id: ProductId = match errors::parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return errors::json_rejection(rejection),
    };

    match services.stock.adjust_stock(id, body.quantity).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::stock_error_to_response(e),
    }
}

pub async fn delete_product(
    Extension(services): Extension<Arc<StockServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: ProductId = match errors::parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.stock.delete_product(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::stock_error_to_response(e),
    }
}
