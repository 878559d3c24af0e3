//! Invoice builder: validates a creation request, computes totals, allocates
//! an invoice number and persists the draft, then renders its document.

use crate::dtos::{CreateInvoiceRequest, LineItemRequest};
use crate::models::{CreateInvoice, CreateLineItem, DocumentOutcome, Invoice, LineItem};
use crate::services::metrics::{DOCUMENT_RENDERS_TOTAL, INVOICES_TOTAL};
use crate::services::numbering::with_unique_number;
use crate::services::renderer::DocumentRenderer;
use crate::services::repository::InvoiceRepository;
use chrono::Utc;
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

/// Largest scale the money columns store.
const MAX_SCALE: u32 = 4;

/// Upper bound (exclusive) on any stored amount, matching NUMERIC(14,4).
fn max_amount() -> Decimal {
    Decimal::new(10_000_000_000, 0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Totals {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
}

/// `subtotal = sum(amounts)`, `total = subtotal + tax - discount`.
pub fn compute_totals(amounts: &[Decimal], tax: Decimal, discount: Decimal) -> Result<Totals, AppError> {
    let overflow = || AppError::validation("Invoice amounts are too large");

    let subtotal = amounts
        .iter()
        .try_fold(Decimal::ZERO, |acc, amount| acc.checked_add(*amount))
        .ok_or_else(overflow)?;
    let total = subtotal
        .checked_add(tax)
        .and_then(|t| t.checked_sub(discount))
        .ok_or_else(overflow)?;

    Ok(Totals {
        subtotal,
        tax,
        discount,
        total,
    })
}

fn check_money(field: &str, value: Decimal) -> Result<(), AppError> {
    if value.normalize().scale() > MAX_SCALE {
        return Err(AppError::validation(format!(
            "{} must not have more than {} decimal places",
            field, MAX_SCALE
        )));
    }
    if value.abs() >= max_amount() {
        return Err(AppError::validation(format!("{} is too large", field)));
    }
    Ok(())
}

/// Validate one requested line and compute its amount.
pub fn line_amount(index: usize, item: &LineItemRequest) -> Result<Decimal, AppError> {
    let line = index + 1;

    if item.description.trim().is_empty() {
        return Err(AppError::validation(format!(
            "Item {}: description is required",
            line
        )));
    }
    if item.quantity <= Decimal::ZERO {
        return Err(AppError::validation(format!(
            "Item {}: quantity must be greater than zero",
            line
        )));
    }
    if item.unit_price < Decimal::ZERO {
        return Err(AppError::validation(format!(
            "Item {}: unit price must not be negative",
            line
        )));
    }
    check_money(&format!("Item {} quantity", line), item.quantity)?;
    check_money(&format!("Item {} unit price", line), item.unit_price)?;

    let amount = item
        .quantity
        .checked_mul(item.unit_price)
        .ok_or_else(|| AppError::validation(format!("Item {}: amount is too large", line)))?;
    check_money(&format!("Item {} amount", line), amount)?;

    if let Some(supplied) = item.amount {
        if supplied != amount {
            return Err(AppError::validation(format!(
                "Item {}: amount {} does not equal quantity x unit price ({})",
                line, supplied, amount
            )));
        }
    }

    Ok(amount)
}

/// Everything needed to insert the draft except its number.
#[derive(Debug, Clone)]
pub struct DraftInvoice {
    pub header: CreateInvoice,
    pub items: Vec<CreateLineItem>,
}

/// Validate `request` and compute its totals. Nothing is written.
pub fn prepare_draft(owner_id: Uuid, request: &CreateInvoiceRequest) -> Result<DraftInvoice, AppError> {
    request.validate()?;

    if request.customer_name.trim().is_empty() {
        return Err(AppError::validation("Customer name is required"));
    }
    if request.due_date < request.issue_date {
        return Err(AppError::validation(
            "Due date must be on or after the issue date",
        ));
    }

    let tax = request.tax.unwrap_or(Decimal::ZERO);
    let discount = request.discount.unwrap_or(Decimal::ZERO);
    if tax < Decimal::ZERO {
        return Err(AppError::validation("Tax must not be negative"));
    }
    if discount < Decimal::ZERO {
        return Err(AppError::validation("Discount must not be negative"));
    }
    check_money("Tax", tax)?;
    check_money("Discount", discount)?;

    let mut items = Vec::with_capacity(request.items.len());
    for (index, item) in request.items.iter().enumerate() {
        let amount = line_amount(index, item)?;
        items.push(CreateLineItem {
            description: item.description.trim().to_string(),
            quantity: item.quantity,
            unit_price: item.unit_price,
            amount,
            sort_order: index as i32,
        });
    }

    let amounts: Vec<Decimal> = items.iter().map(|item| item.amount).collect();
    let totals = compute_totals(&amounts, tax, discount)?;
    if totals.total < Decimal::ZERO {
        return Err(AppError::validation("Discount exceeds the invoice amount"));
    }
    check_money("Subtotal", totals.subtotal)?;
    check_money("Total", totals.total)?;

    Ok(DraftInvoice {
        header: CreateInvoice {
            owner_id,
            customer_id: request.customer_id,
            invoice_number: String::new(),
            customer_name: request.customer_name.trim().to_string(),
            customer_email: request.customer_email.trim().to_string(),
            customer_address: request.customer_address.clone(),
            issue_date: request.issue_date,
            due_date: request.due_date,
            subtotal: totals.subtotal,
            tax: totals.tax,
            discount: totals.discount,
            total: totals.total,
            notes: request.notes.clone(),
        },
        items,
    })
}

#[derive(Clone)]
pub struct InvoiceBuilder {
    repository: Arc<dyn InvoiceRepository>,
    renderer: DocumentRenderer,
}

impl InvoiceBuilder {
    pub fn new(repository: Arc<dyn InvoiceRepository>, renderer: DocumentRenderer) -> Self {
        Self {
            repository,
            renderer,
        }
    }

    /// Create a draft invoice with its items and render its document.
    ///
    /// The document is rendered after the insert commits. A render failure
    /// leaves the invoice in place with `document_status = render_failed`; if
    /// even that outcome cannot be recorded the committed invoice is returned
    /// with `document_status = pending`.
    #[instrument(skip(self, request), fields(owner_id = %owner_id))]
    pub async fn create(
        &self,
        owner_id: Uuid,
        request: &CreateInvoiceRequest,
    ) -> Result<(Invoice, Vec<LineItem>), AppError> {
        let draft = prepare_draft(owner_id, request)?;

        let repository = &self.repository;
        let header = &draft.header;
        let items = &draft.items;

        let (invoice, line_items) = with_unique_number(Utc::now(), move |number| {
            let input = CreateInvoice {
                invoice_number: number,
                ..header.clone()
            };
            async move { repository.create_invoice(&input, items).await }
        })
        .await?;

        INVOICES_TOTAL
            .with_label_values(&[invoice.status.as_str()])
            .inc();

        let invoice = match self.render_and_record(&invoice, &line_items).await {
            Ok(updated) => updated,
            Err(e) => {
                tracing::error!(
                    invoice_id = %invoice.invoice_id,
                    error = %e,
                    "Failed to record document outcome; returning invoice as pending"
                );
                invoice
            }
        };
        Ok((invoice, line_items))
    }

    /// Re-render the document of an owned invoice and record the outcome.
    /// Rendering is deterministic per invoice number, so repeating this is
    /// harmless.
    #[instrument(skip(self), fields(owner_id = %owner_id, invoice_id = %invoice_id))]
    pub async fn render(&self, owner_id: Uuid, invoice_id: Uuid) -> Result<Invoice, AppError> {
        let invoice = self
            .repository
            .get_invoice(owner_id, invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;
        let items = self.repository.get_line_items(invoice.invoice_id).await?;

        let invoice = self.render_and_record(&invoice, &items).await?;
        if invoice.pdf_url.is_none() {
            return Err(AppError::ExternalServiceError(anyhow::anyhow!(
                "Document rendering failed for invoice {}",
                invoice.invoice_number
            )));
        }
        Ok(invoice)
    }

    async fn render_and_record(&self, invoice: &Invoice, items: &[LineItem]) -> Result<Invoice, AppError> {
        let outcome = match self.renderer.render(invoice, items).await {
            Ok(pdf_url) => DocumentOutcome::Rendered { pdf_url },
            Err(e) => {
                tracing::error!(
                    invoice_id = %invoice.invoice_id,
                    error = %e,
                    "Document rendering failed; invoice kept without a document"
                );
                DocumentOutcome::Failed
            }
        };

        let label = match outcome {
            DocumentOutcome::Rendered { .. } => "rendered",
            DocumentOutcome::Failed => "render_failed",
        };
        DOCUMENT_RENDERS_TOTAL.with_label_values(&[label]).inc();

        let updated = self
            .repository
            .record_document(invoice.invoice_id, &outcome)
            .await?;
        Ok(updated.unwrap_or_else(|| invoice.clone()))
    }
}
