use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockbill_core::{AggregateRoot, DomainError, DomainResult, InvoiceId, ProductId, Quantity};

/// Invoice status lifecycle: `Open -> Closed`, never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Open,
    Closed,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Open => "open",
            InvoiceStatus::Closed => "closed",
        }
    }
}

impl core::str::FromStr for InvoiceStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(InvoiceStatus::Open),
            "closed" => Ok(InvoiceStatus::Closed),
            other => Err(DomainError::validation(format!(
                "unknown invoice status '{other}'"
            ))),
        }
    }
}

/// Invoice line: a snapshot of the product taken when the invoice was created.
///
/// Code and description are copied so the invoice keeps its meaning even if the
/// product is later renamed or removed on the stock side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceItem {
    pub product_id: ProductId,
    pub product_code: String,
    pub product_description: String,
    pub quantity: Quantity,
}

/// Aggregate root: Invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    id: InvoiceId,
    number: u64,
    status: InvoiceStatus,
    created_at: DateTime<Utc>,
    printed_at: Option<DateTime<Utc>>,
    items: Vec<InvoiceItem>,
    version: u64,
}

/// Command: OpenInvoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenInvoice {
    pub invoice_id: InvoiceId,
    pub number: u64,
    pub items: Vec<InvoiceItem>,
    pub occurred_at: DateTime<Utc>,
}

impl Invoice {
    /// Build a new, not-yet-persisted invoice in the `Open` state.
    pub fn open(cmd: OpenInvoice) -> DomainResult<Self> {
        if cmd.items.is_empty() {
            return Err(DomainError::validation(
                "an invoice must contain at least one item",
            ));
        }
        if cmd.number == 0 {
            return Err(DomainError::invariant("invoice numbers start at 1"));
        }

        Ok(Self {
            id: cmd.invoice_id,
            number: cmd.number,
            status: InvoiceStatus::Open,
            created_at: cmd.occurred_at,
            printed_at: None,
            items: cmd.items,
            version: 0,
        })
    }

    /// Rebuild an invoice from its persisted representation.
    pub fn rehydrate(
        id: InvoiceId,
        number: u64,
        status: InvoiceStatus,
        created_at: DateTime<Utc>,
        printed_at: Option<DateTime<Utc>>,
        items: Vec<InvoiceItem>,
        version: u64,
    ) -> Self {
        Self {
            id,
            number,
            status,
            created_at,
            printed_at,
            items,
            version,
        }
    }

    /// Stamp the version assigned by the store after a successful write.
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Replace the number (used when a store reassigns after a numbering clash).
    pub fn renumbered(mut self, number: u64) -> Self {
        self.number = number;
        self
    }

    pub fn id_typed(&self) -> InvoiceId {
        self.id
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn status(&self) -> InvoiceStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn printed_at(&self) -> Option<DateTime<Utc>> {
        self.printed_at
    }

    pub fn items(&self) -> &[InvoiceItem] {
        &self.items
    }

    pub fn is_open(&self) -> bool {
        self.status == InvoiceStatus::Open
    }

    /// Transition `Open -> Closed`, stamping `printed_at`.
    pub fn close(&mut self, at: DateTime<Utc>) -> DomainResult<()> {
        if self.status == InvoiceStatus::Closed {
            return Err(DomainError::conflict(format!(
                "invoice {} has already been printed",
                self.number
            )));
        }
        self.status = InvoiceStatus::Closed;
        self.printed_at = Some(at);
        Ok(())
    }

    /// Invariant: only open invoices may be deleted.
    pub fn ensure_deletable(&self) -> DomainResult<()> {
        if self.status != InvoiceStatus::Open {
            return Err(DomainError::invariant(format!(
                "invoice {} is {} and cannot be deleted",
                self.number,
                self.status.as_str()
            )));
        }
        Ok(())
    }
}

impl AggregateRoot for Invoice {
    type Id = InvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}
