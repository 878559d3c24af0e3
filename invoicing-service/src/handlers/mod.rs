pub mod health;
pub mod invoices;
pub mod webhook;

pub use health::{health_check, metrics_endpoint, readiness_check};
pub use invoices::{
    create_invoice, create_payment_intent, get_invoice, list_invoices, render_invoice,
    send_invoice,
};
pub use webhook::payment_webhook;
