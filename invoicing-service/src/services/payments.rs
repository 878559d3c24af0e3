//! Payment intent gateway: asks the payment provider for an intent covering an
//! invoice total and records the provider reference on the invoice.

use crate::services::metrics::EXTERNAL_ERRORS_TOTAL;
use crate::services::providers::{PaymentIntent, PaymentProvider, ProviderError};
use crate::services::repository::InvoiceRepository;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use service_core::error::AppError;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;
use uuid::Uuid;

pub const CURRENCY: &str = "usd";

/// Largest amount the provider accepts in a single intent, in cents.
pub const MAX_MINOR_UNITS: i64 = 99_999_999;

/// Convert a money amount to whole cents, rounding half away from zero.
pub fn to_minor_units(amount: Decimal) -> Result<i64, AppError> {
    let out_of_range = || AppError::validation("Invoice total is out of range for payment");

    let minor = amount
        .checked_mul(Decimal::ONE_HUNDRED)
        .ok_or_else(out_of_range)?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(out_of_range)?;

    if minor <= 0 {
        return Err(AppError::validation(
            "Invoice total must be greater than zero to collect payment",
        ));
    }
    if minor > MAX_MINOR_UNITS {
        return Err(AppError::validation(
            "Invoice total exceeds the maximum payable amount",
        ));
    }
    Ok(minor)
}

#[derive(Clone)]
pub struct PaymentIntentGateway {
    repository: Arc<dyn InvoiceRepository>,
    provider: Arc<dyn PaymentProvider>,
    timeout: Duration,
}

impl PaymentIntentGateway {
    pub fn new(
        repository: Arc<dyn InvoiceRepository>,
        provider: Arc<dyn PaymentProvider>,
        timeout: Duration,
    ) -> Self {
        Self {
            repository,
            provider,
            timeout,
        }
    }

    /// Issue a provider payment intent for an owned, unpaid invoice.
    ///
    /// An intent already attached to the invoice is returned again unless the
    /// provider reports it canceled, so only one live intent can settle the
    /// invoice. Never marks the invoice paid; that only happens through a
    /// verified webhook.
    #[instrument(skip(self), fields(owner_id = %owner_id, invoice_id = %invoice_id))]
    pub async fn create(&self, owner_id: Uuid, invoice_id: Uuid) -> Result<PaymentIntent, AppError> {
        let invoice = self
            .repository
            .get_invoice(owner_id, invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

        if invoice.is_paid() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Invoice {} is already paid",
                invoice.invoice_number
            )));
        }

        let amount = to_minor_units(invoice.total)?;

        if let Some(existing) = invoice.stripe_payment_intent_id.as_deref() {
            let intent = self
                .call_provider(
                    "Failed to retrieve payment intent",
                    self.provider.retrieve_payment_intent(existing),
                )
                .await?;
            if intent.is_reusable() {
                tracing::info!(payment_intent_id = %intent.id, "Reusing attached payment intent");
                return Ok(intent);
            }
            tracing::info!(
                payment_intent_id = %intent.id,
                "Attached payment intent was canceled, issuing a new one"
            );
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("invoice_id".to_string(), invoice.invoice_id.to_string());
        metadata.insert("invoice_number".to_string(), invoice.invoice_number.clone());

        let intent = self
            .call_provider(
                "Failed to create payment intent",
                self.provider.create_payment_intent(amount, CURRENCY, &metadata),
            )
            .await?;

        self.repository
            .set_payment_intent(owner_id, invoice_id, &intent.id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

        tracing::info!(
            payment_intent_id = %intent.id,
            amount = amount,
            "Payment intent attached to invoice"
        );

        Ok(intent)
    }

    async fn call_provider<F>(&self, context: &'static str, call: F) -> Result<PaymentIntent, AppError>
    where
        F: Future<Output = Result<PaymentIntent, ProviderError>>,
    {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| anyhow::anyhow!("Payment provider timed out after {:?}", self.timeout))
            .and_then(|result| result.map_err(anyhow::Error::new))
            .map_err(|e| {
                EXTERNAL_ERRORS_TOTAL
                    .with_label_values(&["payment_provider"])
                    .inc();
                AppError::ExternalServiceError(e.context(context))
            })
    }
}
