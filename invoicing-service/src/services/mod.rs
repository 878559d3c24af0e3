//! Services module for invoicing-service.

pub mod builder;
pub mod database;
pub mod delivery;
pub mod metrics;
pub mod numbering;
pub mod payments;
pub mod providers;
pub mod reconciler;
pub mod renderer;
pub mod repository;

pub use builder::InvoiceBuilder;
pub use database::Database;
pub use delivery::DeliveryService;
pub use metrics::{get_metrics, init_metrics};
pub use payments::PaymentIntentGateway;
pub use providers::{
    Mailer, MockMailer, MockPaymentProvider, PaymentProvider, SmtpMailer, StripeClient,
};
pub use reconciler::{ReconcileOutcome, WebhookReconciler};
pub use renderer::{DocumentRenderer, DocumentStore, LocalDocumentStore};
pub use repository::{InMemoryInvoiceRepository, InvoiceRepository};
