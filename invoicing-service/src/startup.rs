//! Application startup and lifecycle management.

use crate::config::InvoicingConfig;
use crate::handlers;
use crate::middleware::TokenVerifier;
use crate::services::{
    Database, DeliveryService, DocumentRenderer, DocumentStore, InMemoryInvoiceRepository,
    InvoiceBuilder, InvoiceRepository, LocalDocumentStore, Mailer, PaymentIntentGateway,
    PaymentProvider, SmtpMailer, StripeClient, WebhookReconciler,
};
use axum::middleware::from_fn;
use axum::{
    routing::{get, post},
    Router,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware, security_headers::security_headers_middleware,
    tracing::{request_id_middleware, REQUEST_ID_HEADER},
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<dyn InvoiceRepository>,
    pub builder: InvoiceBuilder,
    pub delivery: DeliveryService,
    pub payments: PaymentIntentGateway,
    pub reconciler: WebhookReconciler,
    pub tokens: TokenVerifier,
}

impl AsRef<TokenVerifier> for AppState {
    fn as_ref(&self) -> &TokenVerifier {
        &self.tokens
    }
}

/// External collaborators the workflow talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub repository: Arc<dyn InvoiceRepository>,
    pub documents: Arc<dyn DocumentStore>,
    pub mailer: Arc<dyn Mailer>,
    pub payments: Arc<dyn PaymentProvider>,
}

impl Collaborators {
    /// Production collaborators as configured.
    pub async fn from_config(config: &InvoicingConfig) -> Result<Self, AppError> {
        let repository: Arc<dyn InvoiceRepository> = if config.uses_database() {
            let db = Database::new(
                config.database.url.expose_secret(),
                config.database.max_connections,
                config.database.min_connections,
            )
            .await
            .map_err(|e| {
                tracing::error!("Failed to connect to PostgreSQL: {}", e);
                e
            })?;
            db.run_migrations().await.map_err(|e| {
                tracing::error!("Failed to run database migrations: {}", e);
                e
            })?;
            Arc::new(db)
        } else {
            tracing::warn!("DATABASE_URL not set - using in-memory invoice store");
            Arc::new(InMemoryInvoiceRepository::new())
        };

        let documents: Arc<dyn DocumentStore> = Arc::new(
            LocalDocumentStore::new(&config.storage.uploads_dir)
                .await
                .map_err(|e| {
                    tracing::error!(
                        "Failed to initialize document storage at {}: {}",
                        config.storage.uploads_dir,
                        e
                    );
                    e
                })?,
        );

        let mailer = SmtpMailer::new(config.smtp.clone())
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("SMTP setup failed: {}", e)))?;
        if !config.smtp.is_configured() {
            tracing::warn!("SMTP host not configured - invoice delivery will fail");
        }

        let stripe = StripeClient::new(config.stripe.clone());
        if stripe.is_configured() {
            tracing::info!("Stripe client initialized");
        } else {
            tracing::warn!("Stripe credentials not configured - payment intents will fail");
        }

        Ok(Self {
            repository,
            documents,
            mailer: Arc::new(mailer),
            payments: Arc::new(stripe),
        })
    }
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: InvoicingConfig) -> Result<Self, AppError> {
        let collaborators = Collaborators::from_config(&config).await?;
        Self::build_with(config, collaborators).await
    }

    /// Build the application around explicit collaborators.
    pub async fn build_with(
        config: InvoicingConfig,
        collaborators: Collaborators,
    ) -> Result<Self, AppError> {
        let state = build_state(&config, collaborators);
        let router = router(state.clone());

        // Port 0 binds a random port for testing
        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Invoicing service listening on port {}", port);

        Ok(Self {
            port,
            listener,
            router,
            state,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Serve until the process is killed.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        axum::serve(self.listener, self.router).await
    }

    /// Serve until `signal` resolves, then drain in-flight requests.
    pub async fn run_until<F>(self, signal: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(signal)
            .await
    }
}

pub fn build_state(config: &InvoicingConfig, collaborators: Collaborators) -> AppState {
    let timeout = config.external_timeout();
    let Collaborators {
        repository,
        documents,
        mailer,
        payments,
    } = collaborators;

    let renderer = DocumentRenderer::new(documents, timeout);
    let builder = InvoiceBuilder::new(repository.clone(), renderer.clone());
    let delivery = DeliveryService::new(
        repository.clone(),
        builder.clone(),
        renderer,
        mailer,
        timeout,
    );
    let gateway = PaymentIntentGateway::new(repository.clone(), payments.clone(), timeout);
    let reconciler = WebhookReconciler::new(repository.clone(), payments);
    let tokens = TokenVerifier::new(config.auth.jwt_secret.expose_secret());

    AppState {
        repository,
        builder,
        delivery,
        payments: gateway,
        reconciler,
        tokens,
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .route(
            "/invoices",
            post(handlers::create_invoice).get(handlers::list_invoices),
        )
        // Provider-signed, no bearer token
        .route("/invoices/webhook", post(handlers::payment_webhook))
        .route("/invoices/:id", get(handlers::get_invoice))
        .route("/invoices/:id/send", post(handlers::send_invoice))
        .route(
            "/invoices/:id/payment-intent",
            post(handlers::create_payment_intent),
        )
        .route("/invoices/:id/render", post(handlers::render_invoice))
        .layer(from_fn(security_headers_middleware))
        .layer(from_fn(metrics_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    owner_id = tracing::field::Empty,
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{MockMailer, MockPaymentProvider};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use secrecy::Secret;
    use tower::ServiceExt;

    async fn test_router(uploads: &std::path::Path) -> Router {
        let config = InvoicingConfig {
            common: service_core::config::Config::default(),
            database: crate::config::DatabaseConfig {
                url: Secret::new(String::new()),
                max_connections: 1,
                min_connections: 1,
            },
            auth: crate::config::AuthConfig {
                jwt_secret: Secret::new("secret".to_string()),
            },
            smtp: crate::config::SmtpConfig {
                host: String::new(),
                port: 587,
                user: String::new(),
                password: Secret::new(String::new()),
                from_name: "Test".to_string(),
                from_email: "test@localhost".to_string(),
            },
            stripe: crate::config::StripeConfig {
                secret_key: Secret::new(String::new()),
                webhook_secret: Secret::new("whsec_test".to_string()),
                api_base_url: "http://127.0.0.1:9".to_string(),
                webhook_tolerance_secs: 300,
            },
            storage: crate::config::StorageConfig {
                uploads_dir: uploads.display().to_string(),
            },
            external_timeout_secs: 1,
            otlp_endpoint: None,
        };

        let collaborators = Collaborators {
            repository: Arc::new(InMemoryInvoiceRepository::new()),
            documents: Arc::new(LocalDocumentStore::new(uploads).await.unwrap()),
            mailer: Arc::new(MockMailer::new()),
            payments: Arc::new(MockPaymentProvider::new("whsec_test")),
        };

        router(build_state(&config, collaborators))
    }

    #[tokio::test]
    async fn owned_routes_require_a_token_and_webhook_does_not() {
        let uploads = tempfile::tempdir().unwrap();
        let app = test_router(uploads.path()).await;

        let listed = app
            .clone()
            .oneshot(Request::get("/invoices").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(listed.status(), StatusCode::UNAUTHORIZED);

        // Reaches signature verification rather than bearer auth
        let webhook = app
            .oneshot(
                Request::post("/invoices/webhook")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(webhook.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn responses_carry_security_headers_and_request_id() {
        let uploads = tempfile::tempdir().unwrap();
        let app = test_router(uploads.path()).await;

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
        assert!(response.headers().contains_key("x-content-type-options"));
    }
}
