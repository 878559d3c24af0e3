//! Domain models for invoicing-service.

mod invoice;
mod line_item;

pub use invoice::{
    CreateInvoice, DocumentOutcome, DocumentStatus, Invoice, InvoiceStatus, ListInvoicesFilter,
    PaidTransition,
};
pub use line_item::{CreateLineItem, LineItem};
