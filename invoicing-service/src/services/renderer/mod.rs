//! Document renderer: lays out an invoice as a PDF and writes it to document
//! storage.

pub mod pdf;
pub mod storage;

pub use storage::{DocumentStore, LocalDocumentStore};

use crate::models::{Invoice, LineItem};
use crate::services::metrics::EXTERNAL_ERRORS_TOTAL;
use service_core::error::AppError;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

#[derive(Clone)]
pub struct DocumentRenderer {
    store: Arc<dyn DocumentStore>,
    timeout: Duration,
}

impl DocumentRenderer {
    pub fn new(store: Arc<dyn DocumentStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Render and store the document, returning its reference.
    ///
    /// Rendering the same invoice again overwrites the same file and yields
    /// the same reference.
    #[instrument(skip(self, invoice, items), fields(invoice_id = %invoice.invoice_id, invoice_number = %invoice.invoice_number))]
    pub async fn render(&self, invoice: &Invoice, items: &[LineItem]) -> Result<String, AppError> {
        let bytes = pdf::render_invoice(invoice, items)?;
        let name = invoice.document_name();

        let reference = tokio::time::timeout(self.timeout, self.store.put(&name, bytes))
            .await
            .map_err(|_| {
                EXTERNAL_ERRORS_TOTAL
                    .with_label_values(&["document_store"])
                    .inc();
                AppError::ExternalServiceError(anyhow::anyhow!(
                    "Document store write timed out after {:?}",
                    self.timeout
                ))
            })?
            .map_err(|e| {
                EXTERNAL_ERRORS_TOTAL
                    .with_label_values(&["document_store"])
                    .inc();
                AppError::ExternalServiceError(anyhow::anyhow!(
                    "Failed to store document {}: {}",
                    name,
                    e
                ))
            })?;

        tracing::info!(reference = %reference, "Invoice document rendered");
        Ok(reference)
    }

    /// Load a previously rendered document.
    pub async fn fetch(&self, reference: &str) -> Result<Vec<u8>, AppError> {
        tokio::time::timeout(self.timeout, self.store.get(reference))
            .await
            .map_err(|_| {
                AppError::ExternalServiceError(anyhow::anyhow!(
                    "Document store read timed out after {:?}",
                    self.timeout
                ))
            })?
    }
}
