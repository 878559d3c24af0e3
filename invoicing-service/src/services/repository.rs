//! Data store seam for invoices.
//!
//! `Database` (Postgres) is the production implementation. The in-memory
//! store backs local development without a database and the integration
//! tests; it honours the same uniqueness and atomicity rules.

use crate::models::{
    CreateInvoice, CreateLineItem, DocumentOutcome, DocumentStatus, Invoice, InvoiceStatus,
    LineItem, ListInvoicesFilter, PaidTransition,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

#[async_trait]
pub trait InvoiceRepository: Send + Sync {
    /// Write the header and every line item atomically. A duplicate invoice
    /// number is reported as `AppError::Conflict`.
    async fn create_invoice(
        &self,
        input: &CreateInvoice,
        items: &[CreateLineItem],
    ) -> Result<(Invoice, Vec<LineItem>), AppError>;

    async fn get_invoice(
        &self,
        owner_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, AppError>;

    async fn get_line_items(&self, invoice_id: Uuid) -> Result<Vec<LineItem>, AppError>;

    /// Owned invoices, newest first.
    async fn list_invoices(
        &self,
        owner_id: Uuid,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, AppError>;

    async fn record_document(
        &self,
        invoice_id: Uuid,
        outcome: &DocumentOutcome,
    ) -> Result<Option<Invoice>, AppError>;

    /// `draft -> sent`. Invoices already sent or paid are returned unchanged.
    async fn mark_sent(&self, owner_id: Uuid, invoice_id: Uuid)
        -> Result<Option<Invoice>, AppError>;

    async fn set_payment_intent(
        &self,
        owner_id: Uuid,
        invoice_id: Uuid,
        payment_intent_id: &str,
    ) -> Result<Option<Invoice>, AppError>;

    /// `* -> paid` keyed by provider reference; a no-op when already paid.
    async fn mark_paid_by_payment_intent(
        &self,
        payment_intent_id: &str,
        payment_method: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<PaidTransition, AppError>;

    async fn health_check(&self) -> Result<(), AppError>;
}

#[derive(Default)]
struct MemoryState {
    invoices: HashMap<Uuid, Invoice>,
    items: HashMap<Uuid, Vec<LineItem>>,
    fail_writes: bool,
    fail_document_writes: bool,
}

/// Process-local invoice store.
#[derive(Default)]
pub struct InMemoryInvoiceRepository {
    state: Mutex<MemoryState>,
}

impl InMemoryInvoiceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `create_invoice` fail as a database error would.
    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Make every subsequent `record_document` fail.
    pub fn fail_document_writes(&self, fail: bool) {
        self.lock().fail_document_writes = fail;
    }

    pub fn invoice_count(&self) -> usize {
        self.lock().invoices.len()
    }

    pub fn line_item_count(&self) -> usize {
        self.lock().items.values().map(Vec::len).sum()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl InvoiceRepository for InMemoryInvoiceRepository {
    async fn create_invoice(
        &self,
        input: &CreateInvoice,
        items: &[CreateLineItem],
    ) -> Result<(Invoice, Vec<LineItem>), AppError> {
        let mut state = self.lock();

        if state.fail_writes {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "Failed to create invoice: store unavailable"
            )));
        }

        if state
            .invoices
            .values()
            .any(|inv| inv.invoice_number == input.invoice_number)
        {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Invoice number '{}' already exists",
                input.invoice_number
            )));
        }

        let now = Utc::now();
        let invoice = Invoice {
            invoice_id: Uuid::new_v4(),
            owner_id: input.owner_id,
            customer_id: input.customer_id,
            invoice_number: input.invoice_number.clone(),
            customer_name: input.customer_name.clone(),
            customer_email: input.customer_email.clone(),
            customer_address: input.customer_address.clone(),
            issue_date: input.issue_date,
            due_date: input.due_date,
            subtotal: input.subtotal,
            tax: input.tax,
            discount: input.discount,
            total: input.total,
            notes: input.notes.clone(),
            status: InvoiceStatus::Draft.as_str().to_string(),
            document_status: DocumentStatus::Pending.as_str().to_string(),
            pdf_url: None,
            stripe_payment_intent_id: None,
            payment_method: None,
            paid_at: None,
            created_at: now,
        };

        let line_items: Vec<LineItem> = items
            .iter()
            .map(|item| LineItem {
                line_item_id: Uuid::new_v4(),
                invoice_id: invoice.invoice_id,
                description: item.description.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price,
                amount: item.amount,
                sort_order: item.sort_order,
                created_at: now,
            })
            .collect();

        state.invoices.insert(invoice.invoice_id, invoice.clone());
        state.items.insert(invoice.invoice_id, line_items.clone());

        Ok((invoice, line_items))
    }

    async fn get_invoice(
        &self,
        owner_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, AppError> {
        Ok(self
            .lock()
            .invoices
            .get(&invoice_id)
            .filter(|inv| inv.owner_id == owner_id)
            .cloned())
    }

    async fn get_line_items(&self, invoice_id: Uuid) -> Result<Vec<LineItem>, AppError> {
        let mut items = self
            .lock()
            .items
            .get(&invoice_id)
            .cloned()
            .unwrap_or_default();
        items.sort_by_key(|item| item.sort_order);
        Ok(items)
    }

    async fn list_invoices(
        &self,
        owner_id: Uuid,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, AppError> {
        let mut invoices: Vec<Invoice> = self
            .lock()
            .invoices
            .values()
            .filter(|inv| inv.owner_id == owner_id)
            .filter(|inv| filter.status.is_none_or(|s| inv.status == s.as_str()))
            .cloned()
            .collect();
        invoices.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(invoices)
    }

    async fn record_document(
        &self,
        invoice_id: Uuid,
        outcome: &DocumentOutcome,
    ) -> Result<Option<Invoice>, AppError> {
        let mut state = self.lock();
        if state.fail_document_writes {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "Failed to record document: store unavailable"
            )));
        }
        let Some(invoice) = state.invoices.get_mut(&invoice_id) else {
            return Ok(None);
        };
        match outcome {
            DocumentOutcome::Rendered { pdf_url } => {
                invoice.pdf_url = Some(pdf_url.clone());
                invoice.document_status = DocumentStatus::Rendered.as_str().to_string();
            }
            DocumentOutcome::Failed => {
                invoice.pdf_url = None;
                invoice.document_status = DocumentStatus::RenderFailed.as_str().to_string();
            }
        }
        Ok(Some(invoice.clone()))
    }

    async fn mark_sent(
        &self,
        owner_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, AppError> {
        let mut state = self.lock();
        let Some(invoice) = state
            .invoices
            .get_mut(&invoice_id)
            .filter(|inv| inv.owner_id == owner_id)
        else {
            return Ok(None);
        };
        if invoice.status == InvoiceStatus::Draft.as_str() {
            invoice.status = InvoiceStatus::Sent.as_str().to_string();
        }
        Ok(Some(invoice.clone()))
    }

    async fn set_payment_intent(
        &self,
        owner_id: Uuid,
        invoice_id: Uuid,
        payment_intent_id: &str,
    ) -> Result<Option<Invoice>, AppError> {
        let mut state = self.lock();

        let taken = state.invoices.values().any(|inv| {
            inv.invoice_id != invoice_id
                && inv.stripe_payment_intent_id.as_deref() == Some(payment_intent_id)
        });
        if taken {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Payment intent is already attached to another invoice"
            )));
        }

        let Some(invoice) = state
            .invoices
            .get_mut(&invoice_id)
            .filter(|inv| inv.owner_id == owner_id)
        else {
            return Ok(None);
        };
        invoice.stripe_payment_intent_id = Some(payment_intent_id.to_string());
        Ok(Some(invoice.clone()))
    }

    async fn mark_paid_by_payment_intent(
        &self,
        payment_intent_id: &str,
        payment_method: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<PaidTransition, AppError> {
        let mut state = self.lock();
        let Some(invoice) = state
            .invoices
            .values_mut()
            .find(|inv| inv.stripe_payment_intent_id.as_deref() == Some(payment_intent_id))
        else {
            return Ok(PaidTransition::NoMatch);
        };

        if invoice.status == InvoiceStatus::Paid.as_str() {
            return Ok(PaidTransition::AlreadyPaid {
                invoice_id: invoice.invoice_id,
            });
        }

        invoice.status = InvoiceStatus::Paid.as_str().to_string();
        invoice.paid_at = Some(paid_at);
        invoice.payment_method = Some(payment_method.to_string());
        Ok(PaidTransition::Transitioned(invoice.clone()))
    }

    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }
}
