//! Invoice model for invoicing-service.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Invoice status. Moves forward only: draft -> sent -> paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Paid,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::Paid => "paid",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(InvoiceStatus::Draft),
            "sent" => Some(InvoiceStatus::Sent),
            "paid" => Some(InvoiceStatus::Paid),
            _ => None,
        }
    }
}

/// Whether the PDF for an invoice exists.
///
/// `RenderFailed` keeps a failed render distinguishable from one that has
/// not been attempted yet; both leave `pdf_url` empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Rendered,
    RenderFailed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Rendered => "rendered",
            DocumentStatus::RenderFailed => "render_failed",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "rendered" => DocumentStatus::Rendered,
            "render_failed" => DocumentStatus::RenderFailed,
            _ => DocumentStatus::Pending,
        }
    }
}

/// Invoice header row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub owner_id: Uuid,
    pub customer_id: Option<Uuid>,
    pub invoice_number: String,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_address: Option<String>,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    pub notes: Option<String>,
    pub status: String,
    pub document_status: String,
    pub pdf_url: Option<String>,
    pub stripe_payment_intent_id: Option<String>,
    pub payment_method: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Invoice {
    pub fn status(&self) -> Option<InvoiceStatus> {
        InvoiceStatus::from_string(&self.status)
    }

    pub fn document_status(&self) -> DocumentStatus {
        DocumentStatus::from_string(&self.document_status)
    }

    pub fn is_paid(&self) -> bool {
        self.status() == Some(InvoiceStatus::Paid)
    }

    /// Deterministic storage name of the rendered document.
    pub fn document_name(&self) -> String {
        format!("invoice-{}.pdf", self.invoice_number)
    }
}

/// Filter parameters for listing invoices.
#[derive(Debug, Clone, Default)]
pub struct ListInvoicesFilter {
    pub status: Option<InvoiceStatus>,
}

/// Validated input for persisting a new invoice. Totals are already computed.
#[derive(Debug, Clone)]
pub struct CreateInvoice {
    pub owner_id: Uuid,
    pub customer_id: Option<Uuid>,
    pub invoice_number: String,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_address: Option<String>,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    pub notes: Option<String>,
}

/// Result of recording a document render.
#[derive(Debug, Clone)]
pub enum DocumentOutcome {
    Rendered { pdf_url: String },
    Failed,
}

/// Result of the `* -> paid` transition keyed by provider reference.
#[derive(Debug, Clone)]
pub enum PaidTransition {
    /// This call moved the invoice to paid.
    Transitioned(Invoice),
    /// The matching invoice was already paid; nothing changed.
    AlreadyPaid { invoice_id: Uuid },
    /// No invoice carries this provider reference.
    NoMatch,
}
