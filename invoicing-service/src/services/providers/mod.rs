//! External collaborators: mail transport and payment provider.

pub mod email;
pub mod stripe;

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;

pub use email::{MockMailer, SmtpMailer};
pub use stripe::{MockPaymentProvider, StripeClient};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider not enabled: {0}")]
    NotEnabled(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Send error: {0}")]
    SendFailed(String),

    #[error("Provider request failed: {0}")]
    RequestFailed(String),
}

#[derive(Debug, Clone)]
pub struct EmailAttachment {
    pub filename: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body_html: String,
    pub attachments: Vec<EmailAttachment>,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &EmailMessage) -> Result<(), ProviderError>;
}

/// Payment intent as returned by the provider.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
    #[serde(default)]
    pub status: Option<String>,
}

impl PaymentIntent {
    /// Every status except `canceled` can still settle the invoice.
    pub fn is_reusable(&self) -> bool {
        self.status.as_deref() != Some("canceled")
    }
}

/// Verified provider event. Only the fields reconciliation reads are typed.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventData {
    pub object: serde_json::Value,
}

impl WebhookEvent {
    pub const PAYMENT_INTENT_SUCCEEDED: &'static str = "payment_intent.succeeded";

    /// Id of the object the event is about (the payment intent for
    /// `payment_intent.*` events).
    pub fn object_id(&self) -> Option<&str> {
        self.data.object.get("id").and_then(|id| id.as_str())
    }
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Create a payment intent for `amount` minor units.
    async fn create_payment_intent(
        &self,
        amount: i64,
        currency: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<PaymentIntent, ProviderError>;

    /// Look up an existing intent, including its client secret and status.
    async fn retrieve_payment_intent(&self, id: &str) -> Result<PaymentIntent, ProviderError>;

    /// Authenticate a webhook delivery against the exact raw body and parse
    /// it. Fails with `AppError::SignatureError` on any mismatch.
    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: Option<&str>,
    ) -> Result<WebhookEvent, service_core::error::AppError>;
}
