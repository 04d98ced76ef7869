use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockbill_core::{AggregateRoot, InvoiceId, ProductId};
use stockbill_infra::{InvoiceLineRequest, ProductDetails};
use stockbill_invoicing::{Invoice, InvoiceItem, InvoiceStatus};
use stockbill_products::Product;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateInvoiceRequest {
    #[serde(default)]
    pub items: Vec<InvoiceLineDto>,
}

#[derive(Debug, Deserialize)]
pub struct InvoiceLineDto {
    pub product_id: ProductId,
    pub quantity: Decimal,
}

impl From<InvoiceLineDto> for InvoiceLineRequest {
    fn from(dto: InvoiceLineDto) -> Self {
        InvoiceLineRequest {
            product_id: dto.product_id,
            quantity: dto.quantity,
        }
    }
}

/// Body of `POST /api/products` and `PUT /api/products/:id`.
#[derive(Debug, Deserialize)]
pub struct ProductRequest {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub stock: Decimal,
}

impl From<ProductRequest> for ProductDetails {
    fn from(req: ProductRequest) -> Self {
        ProductDetails {
            code: req.code,
            description: req.description,
            stock: req.stock,
        }
    }
}

/// Signed stock delta; negative consumes.
#[derive(Debug, Deserialize)]
pub struct AdjustStockRequest {
    pub quantity: Decimal,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct InvoiceResponse {
    pub id: InvoiceId,
    pub number: u64,
    pub status: InvoiceStatus,
    pub created_at: DateTime<Utc>,
    pub printed_at: Option<DateTime<Utc>>,
    pub items: Vec<InvoiceItem>,
}

impl From<&Invoice> for InvoiceResponse {
    fn from(invoice: &Invoice) -> Self {
        InvoiceResponse {
            id: invoice.id_typed(),
            number: invoice.number(),
            status: invoice.status(),
            created_at: invoice.created_at(),
            printed_at: invoice.printed_at(),
            items: invoice.items().to_vec(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProductResponse {
    pub id: ProductId,
    pub code: String,
    pub description: String,
    pub stock: Decimal,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<&Product> for ProductResponse {
    fn from(product: &Product) -> Self {
        ProductResponse {
            id: product.id_typed(),
            code: product.code().to_string(),
            description: product.description().to_string(),
            stock: product.stock(),
            version: product.version(),
            created_at: product.created_at(),
            updated_at: product.updated_at(),
        }
    }
}
