//! Webhook reconciler: applies verified payment provider events to invoices.

use crate::models::PaidTransition;
use crate::services::metrics::{INVOICES_TOTAL, WEBHOOK_EVENTS_TOTAL};
use crate::services::providers::{PaymentProvider, WebhookEvent};
use crate::services::repository::InvoiceRepository;
use chrono::Utc;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

pub const PAYMENT_METHOD: &str = "stripe";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// This delivery moved the invoice to paid.
    Paid { invoice_id: Uuid },
    /// The invoice was already paid; nothing changed.
    AlreadyPaid { invoice_id: Uuid },
    /// No invoice carries the referenced payment intent.
    Unmatched { payment_intent_id: String },
    /// Event type this service does not act on.
    Ignored { event_type: String },
}

impl ReconcileOutcome {
    fn label(&self) -> &'static str {
        match self {
            ReconcileOutcome::Paid { .. } => "paid",
            ReconcileOutcome::AlreadyPaid { .. } => "already_paid",
            ReconcileOutcome::Unmatched { .. } => "unmatched",
            ReconcileOutcome::Ignored { .. } => "ignored",
        }
    }
}

#[derive(Clone)]
pub struct WebhookReconciler {
    repository: Arc<dyn InvoiceRepository>,
    provider: Arc<dyn PaymentProvider>,
}

impl WebhookReconciler {
    pub fn new(repository: Arc<dyn InvoiceRepository>, provider: Arc<dyn PaymentProvider>) -> Self {
        Self {
            repository,
            provider,
        }
    }

    /// Verify a raw delivery and apply it. Nothing is read or written before
    /// the signature checks out.
    #[instrument(skip(self, payload, signature_header), fields(payload_len = payload.len()))]
    pub async fn handle(
        &self,
        payload: &[u8],
        signature_header: Option<&str>,
    ) -> Result<ReconcileOutcome, AppError> {
        let event = match self.provider.verify_webhook(payload, signature_header) {
            Ok(event) => event,
            Err(e) => {
                WEBHOOK_EVENTS_TOTAL.with_label_values(&["rejected"]).inc();
                return Err(e);
            }
        };

        let outcome = self.apply(&event).await?;
        WEBHOOK_EVENTS_TOTAL
            .with_label_values(&[outcome.label()])
            .inc();
        Ok(outcome)
    }

    async fn apply(&self, event: &WebhookEvent) -> Result<ReconcileOutcome, AppError> {
        if event.event_type != WebhookEvent::PAYMENT_INTENT_SUCCEEDED {
            tracing::debug!(event_type = %event.event_type, "Ignoring webhook event");
            return Ok(ReconcileOutcome::Ignored {
                event_type: event.event_type.clone(),
            });
        }

        let Some(payment_intent_id) = event.object_id() else {
            tracing::warn!(event_id = ?event.id, "Payment event carries no payment intent id");
            return Ok(ReconcileOutcome::Ignored {
                event_type: event.event_type.clone(),
            });
        };

        let transition = self
            .repository
            .mark_paid_by_payment_intent(payment_intent_id, PAYMENT_METHOD, Utc::now())
            .await?;

        let outcome = match transition {
            PaidTransition::Transitioned(invoice) => {
                INVOICES_TOTAL.with_label_values(&["paid"]).inc();
                tracing::info!(
                    invoice_id = %invoice.invoice_id,
                    invoice_number = %invoice.invoice_number,
                    payment_intent_id = %payment_intent_id,
                    "Invoice marked paid"
                );
                ReconcileOutcome::Paid {
                    invoice_id: invoice.invoice_id,
                }
            }
            PaidTransition::AlreadyPaid { invoice_id } => {
                tracing::info!(
                    invoice_id = %invoice_id,
                    payment_intent_id = %payment_intent_id,
                    "Duplicate payment event; invoice already paid"
                );
                ReconcileOutcome::AlreadyPaid { invoice_id }
            }
            PaidTransition::NoMatch => {
                tracing::warn!(
                    payment_intent_id = %payment_intent_id,
                    "Payment event does not match any invoice"
                );
                ReconcileOutcome::Unmatched {
                    payment_intent_id: payment_intent_id.to_string(),
                }
            }
        };

        Ok(outcome)
    }
}
