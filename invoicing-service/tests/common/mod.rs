#![allow(dead_code)]

use async_trait::async_trait;
use invoicing_service::config::{
    AuthConfig, DatabaseConfig, InvoicingConfig, SmtpConfig, StorageConfig, StripeConfig,
};
use invoicing_service::services::{
    DocumentStore, InMemoryInvoiceRepository, LocalDocumentStore, MockMailer, MockPaymentProvider,
};
use invoicing_service::startup::{Application, Collaborators};
use jsonwebtoken::{encode, EncodingKey, Header};
use secrecy::Secret;
use serde::Serialize;
use serde_json::{json, Value};
use service_core::error::AppError;
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str = "test-jwt-secret";
pub const TEST_WEBHOOK_SECRET: &str = "whsec_test";

/// Document store that refuses every write and read.
pub struct FailingDocumentStore;

#[async_trait]
impl DocumentStore for FailingDocumentStore {
    async fn put(&self, name: &str, _data: Vec<u8>) -> Result<String, AppError> {
        Err(AppError::ExternalServiceError(anyhow::anyhow!(
            "Storage unavailable for {}",
            name
        )))
    }

    async fn get(&self, reference: &str) -> Result<Vec<u8>, AppError> {
        Err(AppError::ExternalServiceError(anyhow::anyhow!(
            "Storage unavailable for {}",
            reference
        )))
    }
}

#[derive(Serialize)]
struct TestClaims {
    sub: String,
    exp: usize,
}

pub fn token_for(owner_id: Uuid) -> String {
    let claims = TestClaims {
        sub: owner_id.to_string(),
        exp: (chrono::Utc::now().timestamp() + 3600) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
    )
    .expect("Failed to sign test token")
}

pub fn test_config() -> InvoicingConfig {
    let mut common = service_core::config::Config::default();
    common.port = 0; // Random port

    InvoicingConfig {
        common,
        database: DatabaseConfig {
            url: Secret::new(String::new()),
            max_connections: 1,
            min_connections: 1,
        },
        auth: AuthConfig {
            jwt_secret: Secret::new(TEST_JWT_SECRET.to_string()),
        },
        smtp: SmtpConfig {
            host: String::new(),
            port: 587,
            user: String::new(),
            password: Secret::new(String::new()),
            from_name: "Test Co".to_string(),
            from_email: "billing@test.local".to_string(),
        },
        stripe: StripeConfig {
            secret_key: Secret::new("sk_test".to_string()),
            webhook_secret: Secret::new(TEST_WEBHOOK_SECRET.to_string()),
            api_base_url: "http://127.0.0.1:9".to_string(),
            webhook_tolerance_secs: 300,
        },
        storage: StorageConfig {
            uploads_dir: String::new(),
        },
        external_timeout_secs: 5,
        otlp_endpoint: None,
    }
}

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub owner_id: Uuid,
    pub token: String,
    pub client: reqwest::Client,
    pub repository: Arc<InMemoryInvoiceRepository>,
    pub mailer: Arc<MockMailer>,
    pub payments: Arc<MockPaymentProvider>,
    pub uploads: TempDir,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with_store(None).await
    }

    /// Spawn with a document store that always fails.
    pub async fn spawn_with_failing_store() -> Self {
        Self::spawn_with_store(Some(Arc::new(FailingDocumentStore))).await
    }

    async fn spawn_with_store(store: Option<Arc<dyn DocumentStore>>) -> Self {
        let uploads = TempDir::new().expect("Failed to create uploads dir");
        let mut config = test_config();
        config.storage.uploads_dir = uploads.path().display().to_string();

        let documents: Arc<dyn DocumentStore> = match store {
            Some(store) => store,
            None => Arc::new(
                LocalDocumentStore::new(uploads.path())
                    .await
                    .expect("Failed to create document store"),
            ),
        };

        let repository = Arc::new(InMemoryInvoiceRepository::new());
        let mailer = Arc::new(MockMailer::new());
        let payments = Arc::new(MockPaymentProvider::new(TEST_WEBHOOK_SECRET));

        let collaborators = Collaborators {
            repository: repository.clone(),
            documents,
            mailer: mailer.clone(),
            payments: payments.clone(),
        };

        let app = Application::build_with(config, collaborators)
            .await
            .expect("Failed to build test application");

        let port = app.port();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for the server by polling the health endpoint
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        let owner_id = Uuid::new_v4();
        TestApp {
            address,
            port,
            owner_id,
            token: token_for(owner_id),
            client,
            repository,
            mailer,
            payments,
            uploads,
        }
    }

    pub async fn post_invoice(&self, body: &Value) -> reqwest::Response {
        self.post_invoice_as(&self.token, body).await
    }

    pub async fn post_invoice_as(&self, token: &str, body: &Value) -> reqwest::Response {
        self.client
            .post(format!("{}/invoices", self.address))
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.address, path))
            .bearer_auth(&self.token)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn post(&self, path: &str) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.address, path))
            .bearer_auth(&self.token)
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// Deliver `payload` to the webhook endpoint with the given signature header.
    pub async fn post_webhook(&self, payload: &[u8], signature: Option<&str>) -> reqwest::Response {
        let mut request = self
            .client
            .post(format!("{}/invoices/webhook", self.address))
            .header("content-type", "application/json")
            .body(payload.to_vec());
        if let Some(signature) = signature {
            request = request.header("Stripe-Signature", signature);
        }
        request.send().await.expect("Failed to execute request")
    }

    /// Create an invoice and return the `data.invoice` object.
    pub async fn create_invoice(&self, body: &Value) -> Value {
        let response = self.post_invoice(body).await;
        assert_eq!(response.status().as_u16(), 201);
        let body: Value = response.json().await.expect("Failed to parse JSON");
        body["data"]["invoice"].clone()
    }

    pub async fn fetch_invoice(&self, invoice_id: &str) -> Value {
        let response = self.get(&format!("/invoices/{}", invoice_id)).await;
        assert_eq!(response.status().as_u16(), 200);
        let body: Value = response.json().await.expect("Failed to parse JSON");
        body["data"]["invoice"].clone()
    }

    /// Signed `payment_intent.succeeded` delivery for `payment_intent_id`.
    pub async fn pay(&self, payment_intent_id: &str) -> reqwest::Response {
        let payload = succeeded_event(payment_intent_id);
        let signature = self.payments.sign(&payload);
        self.post_webhook(&payload, Some(&signature)).await
    }
}

pub fn invoice_request() -> Value {
    json!({
        "customer_name": "Acme Ltd",
        "customer_email": "ap@acme.test",
        "customer_address": "1 Market Street\nSpringfield",
        "issue_date": "2026-03-01",
        "due_date": "2026-03-31",
        "items": [
            { "description": "Design", "quantity": "1", "unit_price": "500.00" }
        ],
        "tax": "40",
        "discount": "0",
        "notes": "Thank you for your business"
    })
}

pub fn succeeded_event(payment_intent_id: &str) -> Vec<u8> {
    json!({
        "id": format!("evt_{}", payment_intent_id),
        "type": "payment_intent.succeeded",
        "data": { "object": { "id": payment_intent_id, "object": "payment_intent" } }
    })
    .to_string()
    .into_bytes()
}

pub fn decimal(value: &Value) -> rust_decimal::Decimal {
    value
        .as_str()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| panic!("Not a decimal string: {}", value))
}
