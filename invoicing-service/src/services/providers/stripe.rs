//! Stripe payment provider client.
//!
//! Creates payment intents through the form-encoded REST API and verifies
//! webhook deliveries signed with the endpoint secret.

use super::{PaymentIntent, PaymentProvider, ProviderError, WebhookEvent};
use crate::config::StripeConfig;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;
use service_core::error::AppError;
use service_core::utils::signature::{generate_signature, verify_signature};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    #[serde(default)]
    message: Option<String>,
    #[serde(rename = "type", default)]
    error_type: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

/// Parsed `Stripe-Signature` header: `t=<unix>,v1=<hex>[,v1=<hex>...]`.
#[derive(Debug, PartialEq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    pub signatures: Vec<String>,
}

impl SignatureHeader {
    pub fn parse(header: &str) -> Option<Self> {
        let mut timestamp = None;
        let mut signatures = Vec::new();

        for part in header.split(',') {
            let (key, value) = part.trim().split_once('=')?;
            match key {
                "t" => timestamp = value.parse::<i64>().ok(),
                "v1" => signatures.push(value.to_string()),
                _ => {}
            }
        }

        match (timestamp, signatures.is_empty()) {
            (Some(timestamp), false) => Some(Self {
                timestamp,
                signatures,
            }),
            _ => None,
        }
    }
}

/// Verify a webhook delivery and parse its event.
pub fn verify_signed_payload(
    secret: &str,
    payload: &[u8],
    signature_header: Option<&str>,
    tolerance_secs: i64,
    now: i64,
) -> Result<WebhookEvent, AppError> {
    let header = signature_header
        .ok_or_else(|| AppError::SignatureError(anyhow::anyhow!("Missing Stripe-Signature header")))?;

    let parsed = SignatureHeader::parse(header)
        .ok_or_else(|| AppError::SignatureError(anyhow::anyhow!("Malformed Stripe-Signature header")))?;

    let within_tolerance = now
        .checked_sub(parsed.timestamp)
        .map(i64::unsigned_abs)
        .is_some_and(|age| age <= u64::try_from(tolerance_secs).unwrap_or(0));
    if !within_tolerance {
        return Err(AppError::SignatureError(anyhow::anyhow!(
            "Webhook timestamp outside tolerance"
        )));
    }

    let mut matched = false;
    for candidate in &parsed.signatures {
        if verify_signature(secret, parsed.timestamp, payload, candidate)
            .map_err(AppError::SignatureError)?
        {
            matched = true;
            break;
        }
    }
    if !matched {
        return Err(AppError::SignatureError(anyhow::anyhow!(
            "No signature matches the payload"
        )));
    }

    serde_json::from_slice(payload).map_err(|e| {
        AppError::SignatureError(anyhow::anyhow!("Webhook payload is not a valid event: {}", e))
    })
}

/// Build a `Stripe-Signature` header value for `payload`.
pub fn sign_payload(secret: &str, payload: &[u8], timestamp: i64) -> anyhow::Result<String> {
    let signature = generate_signature(secret, timestamp, payload)?;
    Ok(format!("t={},v1={}", timestamp, signature))
}

#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    config: StripeConfig,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.config.secret_key.expose_secret().is_empty()
    }

    async fn send_intent_request(
        &self,
        request: reqwest::RequestBuilder,
        operation: &str,
    ) -> Result<PaymentIntent, ProviderError> {
        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(format!("Stripe request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::RequestFailed(format!("Stripe response unreadable: {}", e)))?;

        if status.is_success() {
            return serde_json::from_str(&body).map_err(|e| {
                ProviderError::RequestFailed(format!("Unexpected Stripe response: {}", e))
            });
        }

        let detail = serde_json::from_str::<StripeErrorBody>(&body)
            .map(|b| b.error)
            .unwrap_or(StripeErrorDetail {
                message: Some(body.clone()),
                error_type: None,
                code: None,
            });
        tracing::error!(
            status = %status,
            error_type = detail.error_type.as_deref().unwrap_or("unknown"),
            code = detail.code.as_deref().unwrap_or("-"),
            "Stripe payment intent {} failed",
            operation
        );
        Err(ProviderError::RequestFailed(format!(
            "Stripe error {}: {}",
            status,
            detail.message.unwrap_or_default()
        )))
    }
}

#[async_trait]
impl PaymentProvider for StripeClient {
    async fn create_payment_intent(
        &self,
        amount: i64,
        currency: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<PaymentIntent, ProviderError> {
        if !self.is_configured() {
            return Err(ProviderError::NotEnabled(
                "Stripe secret key not configured".to_string(),
            ));
        }

        let mut form: Vec<(String, String)> = vec![
            ("amount".to_string(), amount.to_string()),
            ("currency".to_string(), currency.to_string()),
        ];
        for (key, value) in metadata {
            form.push((format!("metadata[{}]", key), value.clone()));
        }

        let url = format!("{}/payment_intents", self.config.api_base_url);
        let request = self
            .client
            .post(&url)
            .bearer_auth(self.config.secret_key.expose_secret())
            .form(&form);

        let intent = self.send_intent_request(request, "creation").await?;
        tracing::info!(
            payment_intent_id = %intent.id,
            amount = amount,
            currency = %currency,
            "Stripe payment intent created"
        );
        Ok(intent)
    }

    async fn retrieve_payment_intent(&self, id: &str) -> Result<PaymentIntent, ProviderError> {
        if !self.is_configured() {
            return Err(ProviderError::NotEnabled(
                "Stripe secret key not configured".to_string(),
            ));
        }

        let url = format!("{}/payment_intents/{}", self.config.api_base_url, id);
        let request = self
            .client
            .get(&url)
            .bearer_auth(self.config.secret_key.expose_secret());

        self.send_intent_request(request, "retrieval").await
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: Option<&str>,
    ) -> Result<WebhookEvent, AppError> {
        verify_signed_payload(
            self.config.webhook_secret.expose_secret(),
            payload,
            signature_header,
            self.config.webhook_tolerance_secs,
            Utc::now().timestamp(),
        )
    }
}

/// In-process provider with deterministic ids and the real signature scheme.
pub struct MockPaymentProvider {
    webhook_secret: String,
    id_prefix: String,
    counter: AtomicU64,
    failing: AtomicBool,
    requests: Mutex<Vec<(i64, String, BTreeMap<String, String>)>>,
    intents: Mutex<HashMap<String, PaymentIntent>>,
}

impl MockPaymentProvider {
    pub fn new(webhook_secret: impl Into<String>) -> Self {
        Self {
            webhook_secret: webhook_secret.into(),
            id_prefix: "pi_mock".to_string(),
            counter: AtomicU64::new(0),
            failing: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
            intents: Mutex::new(HashMap::new()),
        }
    }

    /// Issue ids as `<prefix>_000001`, ... instead of `pi_mock_000001`.
    pub fn with_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.id_prefix = prefix.into();
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// `(amount, currency, metadata)` of every intent created so far.
    pub fn requests(&self) -> Vec<(i64, String, BTreeMap<String, String>)> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Cancel an issued intent, as a customer abandoning checkout would.
    pub fn cancel(&self, id: &str) {
        if let Ok(mut intents) = self.intents.lock() {
            if let Some(intent) = intents.get_mut(id) {
                intent.status = Some("canceled".to_string());
            }
        }
    }

    /// Header value a real provider would send with `payload`.
    pub fn sign(&self, payload: &[u8]) -> String {
        sign_payload(&self.webhook_secret, payload, Utc::now().timestamp()).unwrap_or_default()
    }

    fn check_failing(&self) -> Result<(), ProviderError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProviderError::RequestFailed(
                "Mock provider is set to fail".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentProvider for MockPaymentProvider {
    async fn create_payment_intent(
        &self,
        amount: i64,
        currency: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<PaymentIntent, ProviderError> {
        self.check_failing()?;

        if let Ok(mut requests) = self.requests.lock() {
            requests.push((amount, currency.to_string(), metadata.clone()));
        }

        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let intent = PaymentIntent {
            id: format!("{}_{:06}", self.id_prefix, n),
            client_secret: format!("{}_{:06}_secret_{}", self.id_prefix, n, amount),
            status: Some("requires_payment_method".to_string()),
        };
        if let Ok(mut intents) = self.intents.lock() {
            intents.insert(intent.id.clone(), intent.clone());
        }
        Ok(intent)
    }

    async fn retrieve_payment_intent(&self, id: &str) -> Result<PaymentIntent, ProviderError> {
        self.check_failing()?;

        self.intents
            .lock()
            .ok()
            .and_then(|intents| intents.get(id).cloned())
            .ok_or_else(|| ProviderError::RequestFailed(format!("No such payment intent: {}", id)))
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: Option<&str>,
    ) -> Result<WebhookEvent, AppError> {
        verify_signed_payload(
            &self.webhook_secret,
            payload,
            signature_header,
            300,
            Utc::now().timestamp(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";
    const NOW: i64 = 1_760_000_000;
    const EVENT: &[u8] =
        br#"{"id":"evt_1","type":"payment_intent.succeeded","data":{"object":{"id":"pi_123"}}}"#;

    #[test]
    fn header_parses_timestamp_and_signatures() {
        let parsed = SignatureHeader::parse("t=123,v1=abc,v0=old,v1=def").unwrap();
        assert_eq!(parsed.timestamp, 123);
        assert_eq!(parsed.signatures, vec!["abc", "def"]);

        assert!(SignatureHeader::parse("v1=abc").is_none());
        assert!(SignatureHeader::parse("t=123").is_none());
        assert!(SignatureHeader::parse("garbage").is_none());
    }

    #[test]
    fn valid_signature_yields_event() {
        let header = sign_payload(SECRET, EVENT, NOW).unwrap();
        let event = verify_signed_payload(SECRET, EVENT, Some(&header), 300, NOW).unwrap();

        assert_eq!(event.event_type, WebhookEvent::PAYMENT_INTENT_SUCCEEDED);
        assert_eq!(event.object_id(), Some("pi_123"));
    }

    #[test]
    fn tampered_body_is_rejected() {
        let header = sign_payload(SECRET, EVENT, NOW).unwrap();
        let tampered =
            br#"{"id":"evt_1","type":"payment_intent.succeeded","data":{"object":{"id":"pi_999"}}}"#;

        let result = verify_signed_payload(SECRET, tampered, Some(&header), 300, NOW);
        assert!(matches!(result, Err(AppError::SignatureError(_))));
    }

    #[test]
    fn wrong_secret_missing_header_and_stale_timestamp_are_rejected() {
        let header = sign_payload("whsec_other", EVENT, NOW).unwrap();
        assert!(verify_signed_payload(SECRET, EVENT, Some(&header), 300, NOW).is_err());

        assert!(verify_signed_payload(SECRET, EVENT, None, 300, NOW).is_err());

        let header = sign_payload(SECRET, EVENT, NOW - 301).unwrap();
        assert!(verify_signed_payload(SECRET, EVENT, Some(&header), 300, NOW).is_err());

        for header in ["t=-9223372036854775808,v1=00", "t=9223372036854775807,v1=00"] {
            let result = verify_signed_payload(SECRET, EVENT, Some(header), 300, NOW);
            assert!(matches!(result, Err(AppError::SignatureError(_))));
        }
    }

    #[tokio::test]
    async fn mock_issues_sequential_intents() {
        let provider = MockPaymentProvider::new(SECRET);
        let mut metadata = BTreeMap::new();
        metadata.insert("invoice_number".to_string(), "INV-202610-0001".to_string());

        let first = provider
            .create_payment_intent(54000, "usd", &metadata)
            .await
            .unwrap();
        let second = provider
            .create_payment_intent(100, "usd", &metadata)
            .await
            .unwrap();

        assert_eq!(first.id, "pi_mock_000001");
        assert_eq!(second.id, "pi_mock_000002");
        assert_eq!(provider.requests()[0].0, 54000);
    }

    #[tokio::test]
    async fn mock_retrieves_issued_intents_and_reflects_cancellation() {
        let provider = MockPaymentProvider::new(SECRET);
        let created = provider
            .create_payment_intent(54000, "usd", &BTreeMap::new())
            .await
            .unwrap();

        let fetched = provider.retrieve_payment_intent(&created.id).await.unwrap();
        assert_eq!(fetched.client_secret, created.client_secret);
        assert!(fetched.is_reusable());

        provider.cancel(&created.id);
        let fetched = provider.retrieve_payment_intent(&created.id).await.unwrap();
        assert_eq!(fetched.status.as_deref(), Some("canceled"));
        assert!(!fetched.is_reusable());

        assert!(provider.retrieve_payment_intent("pi_unknown").await.is_err());
    }

    #[tokio::test]
    async fn unconfigured_client_refuses_requests() {
        let client = StripeClient::new(StripeConfig {
            secret_key: secrecy::Secret::new(String::new()),
            webhook_secret: secrecy::Secret::new(SECRET.to_string()),
            api_base_url: "http://127.0.0.1:9".to_string(),
            webhook_tolerance_secs: 300,
        });

        let result = client
            .create_payment_intent(100, "usd", &BTreeMap::new())
            .await;
        assert!(matches!(result, Err(ProviderError::NotEnabled(_))));

        let result = client.retrieve_payment_intent("pi_123").await;
        assert!(matches!(result, Err(ProviderError::NotEnabled(_))));
    }
}
