use crate::models::{Invoice, LineItem};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateInvoiceRequest {
    pub customer_id: Option<Uuid>,

    #[validate(length(min = 1, message = "Customer name is required"))]
    pub customer_name: String,

    #[validate(email(message = "Invalid customer email format"))]
    pub customer_email: String,

    pub customer_address: Option<String>,

    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,

    #[validate(length(min = 1, message = "At least one line item is required"))]
    pub items: Vec<LineItemRequest>,

    #[serde(default)]
    pub tax: Option<Decimal>,

    #[serde(default)]
    pub discount: Option<Decimal>,

    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItemRequest {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    /// Optional; when present it must equal `quantity * unit_price`.
    #[serde(default)]
    pub amount: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct ListInvoicesParams {
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceWithItems {
    pub invoice: Invoice,
    pub items: Vec<LineItem>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntentResponse {
    pub client_secret: String,
    pub payment_intent_id: String,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

/// Success envelope shared by the invoice routes.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn data(data: T) -> Self {
        Self {
            status: "success",
            message: None,
            data: Some(data),
        }
    }

    pub fn with_message(message: impl Into<String>, data: T) -> Self {
        Self {
            status: "success",
            message: Some(message.into()),
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            status: "success",
            message: Some(message.into()),
            data: None,
        }
    }
}
