//! Delivery service: emails an invoice with its document attached and
//! advances it to `sent`.

use crate::models::{Invoice, InvoiceStatus};
use crate::services::builder::InvoiceBuilder;
use crate::services::metrics::{EXTERNAL_ERRORS_TOTAL, INVOICES_TOTAL};
use crate::services::providers::{EmailAttachment, EmailMessage, Mailer};
use crate::services::renderer::pdf::format_money;
use crate::services::renderer::DocumentRenderer;
use crate::services::repository::InvoiceRepository;
use service_core::error::AppError;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;
use uuid::Uuid;

/// Minimal HTML escaping for values interpolated into the email body.
fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Compose the customer email for `invoice` with `document` attached.
pub fn compose_invoice_email(invoice: &Invoice, document: Vec<u8>) -> EmailMessage {
    let body_html = format!(
        "<p>Dear {name},</p>\n\
         <p>Please find attached your invoice.</p>\n\
         <p>Invoice Number: {number}</p>\n\
         <p>Total Amount: {total}</p>\n\
         <p>Due Date: {due}</p>\n\
         <p>Thank you for your business!</p>\n",
        name = escape_html(&invoice.customer_name),
        number = escape_html(&invoice.invoice_number),
        total = format_money(invoice.total),
        due = invoice.due_date.format("%Y-%m-%d"),
    );

    EmailMessage {
        to: invoice.customer_email.clone(),
        subject: format!("Invoice {}", invoice.invoice_number),
        body_html,
        attachments: vec![EmailAttachment {
            filename: invoice.document_name(),
            content_type: "application/pdf".to_string(),
            content: document,
        }],
    }
}

#[derive(Clone)]
pub struct DeliveryService {
    repository: Arc<dyn InvoiceRepository>,
    builder: InvoiceBuilder,
    renderer: DocumentRenderer,
    mailer: Arc<dyn Mailer>,
    timeout: Duration,
}

impl DeliveryService {
    pub fn new(
        repository: Arc<dyn InvoiceRepository>,
        builder: InvoiceBuilder,
        renderer: DocumentRenderer,
        mailer: Arc<dyn Mailer>,
        timeout: Duration,
    ) -> Self {
        Self {
            repository,
            builder,
            renderer,
            mailer,
            timeout,
        }
    }

    /// Email an owned invoice to its customer.
    ///
    /// The status only changes after the mail transport accepts the message;
    /// a failed send leaves the invoice as it was.
    #[instrument(skip(self), fields(owner_id = %owner_id, invoice_id = %invoice_id))]
    pub async fn send(&self, owner_id: Uuid, invoice_id: Uuid) -> Result<Invoice, AppError> {
        let mut invoice = self
            .repository
            .get_invoice(owner_id, invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

        if invoice.pdf_url.is_none() {
            tracing::info!("Invoice has no document yet; rendering before delivery");
            invoice = self.builder.render(owner_id, invoice_id).await?;
        }

        let reference = invoice.pdf_url.clone().ok_or_else(|| {
            AppError::ExternalServiceError(anyhow::anyhow!("Invoice document is unavailable"))
        })?;
        let document = self.renderer.fetch(&reference).await.map_err(|e| {
            AppError::ExternalServiceError(anyhow::anyhow!(
                "Failed to load document {}: {}",
                reference,
                e
            ))
        })?;

        let email = compose_invoice_email(&invoice, document);

        let sent = tokio::time::timeout(self.timeout, self.mailer.send(&email))
            .await
            .map_err(|_| anyhow::anyhow!("Mail transport timed out after {:?}", self.timeout))
            .and_then(|result| result.map_err(anyhow::Error::new));
        if let Err(e) = sent {
            EXTERNAL_ERRORS_TOTAL.with_label_values(&["mail"]).inc();
            return Err(AppError::ExternalServiceError(
                e.context(format!("Failed to email invoice {}", invoice.invoice_number)),
            ));
        }

        let was_draft = invoice.status() == Some(InvoiceStatus::Draft);
        let updated = self
            .repository
            .mark_sent(owner_id, invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

        if was_draft && updated.status() == Some(InvoiceStatus::Sent) {
            INVOICES_TOTAL
                .with_label_values(&[InvoiceStatus::Sent.as_str()])
                .inc();
        }

        tracing::info!(
            invoice_number = %updated.invoice_number,
            status = %updated.status,
            "Invoice delivered"
        );

        Ok(updated)
    }
}
