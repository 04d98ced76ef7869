use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockbill_core::{ensure_decimal_scale, AggregateRoot, DomainError, DomainResult, ProductId};

/// Maximum length of a product code.
pub const MAX_CODE_LEN: usize = 50;
/// Maximum length of a product description.
pub const MAX_DESCRIPTION_LEN: usize = 200;

/// Aggregate root: Product.
///
/// Owns the stock balance. `stock >= 0` holds after every successful mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    id: ProductId,
    code: String,
    description: String,
    stock: Decimal,
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

/// Command: CreateProduct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateProduct {
    pub product_id: ProductId,
    pub code: String,
    pub description: String,
    pub stock: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateProduct (replaces code, description and stock).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateProduct {
    pub product_id: ProductId,
    pub code: String,
    pub description: String,
    pub stock: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AdjustStock (signed delta; negative consumes, positive replenishes).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustStock {
    pub product_id: ProductId,
    pub delta: Decimal,
    pub occurred_at: DateTime<Utc>,
}

impl Product {
    /// Validate a creation command and build a not-yet-persisted product (version 0).
    pub fn create(cmd: &CreateProduct) -> DomainResult<Self> {
        let (code, description) = validate_details(&cmd.code, &cmd.description)?;
        ensure_non_negative_stock(cmd.stock)?;

        Ok(Self {
            id: cmd.product_id,
            code,
            description,
            stock: cmd.stock,
            version: 0,
            created_at: cmd.occurred_at,
            updated_at: None,
        })
    }

    /// Rebuild a product from its persisted representation.
    pub fn rehydrate(
        id: ProductId,
        code: String,
        description: String,
        stock: Decimal,
        version: u64,
        created_at: DateTime<Utc>,
        updated_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            code,
            description,
            stock,
            version,
            created_at,
            updated_at,
        }
    }

    /// Stamp the version assigned by the store after a successful write.
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn id_typed(&self) -> ProductId {
        self.id
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn stock(&self) -> Decimal {
        self.stock
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Invariant: stock may be consumed only while it stays non-negative.
    pub fn can_supply(&self, quantity: Decimal) -> bool {
        self.stock >= quantity
    }

    pub fn update(&mut self, cmd: &UpdateProduct) -> DomainResult<()> {
        self.ensure_product_id(cmd.product_id)?;
        let (code, description) = validate_details(&cmd.code, &cmd.description)?;
        ensure_non_negative_stock(cmd.stock)?;

        self.code = code;
        self.description = description;
        self.stock = cmd.stock;
        self.updated_at = Some(cmd.occurred_at);
        Ok(())
    }

    pub fn adjust_stock(&mut self, cmd: &AdjustStock) -> DomainResult<()> {
        self.ensure_product_id(cmd.product_id)?;

        if cmd.delta.is_zero() {
            return Err(DomainError::validation("delta cannot be zero"));
        }
        ensure_decimal_scale("delta", cmd.delta)?;

        let new_stock = self.stock + cmd.delta;
        if new_stock < Decimal::ZERO {
            return Err(DomainError::insufficient_stock(self.stock, cmd.delta.abs()));
        }

        self.stock = new_stock;
        self.updated_at = Some(cmd.occurred_at);
        Ok(())
    }

    fn ensure_product_id(&self, product_id: ProductId) -> Result<(), DomainError> {
        if self.id != product_id {
            return Err(DomainError::invariant("product_id mismatch"));
        }
        Ok(())
    }
}

impl AggregateRoot for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

fn validate_details(code: &str, description: &str) -> DomainResult<(String, String)> {
    let code = code.trim();
    if code.is_empty() {
        return Err(DomainError::validation("code is required"));
    }
    if code.chars().count() > MAX_CODE_LEN {
        return Err(DomainError::validation(format!(
            "code must be at most {MAX_CODE_LEN} characters"
        )));
    }

    let description = description.trim();
    if description.is_empty() {
        return Err(DomainError::validation("description is required"));
    }
    if description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(DomainError::validation(format!(
            "description must be at most {MAX_DESCRIPTION_LEN} characters"
        )));
    }

    Ok((code.to_string(), description.to_string()))
}

fn ensure_non_negative_stock(stock: Decimal) -> DomainResult<()> {
    if stock < Decimal::ZERO {
        return Err(DomainError::validation("stock cannot be negative"));
    }
    ensure_decimal_scale("stock", stock)
}
