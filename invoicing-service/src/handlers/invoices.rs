use crate::dtos::{
    ApiResponse, CreateInvoiceRequest, InvoiceWithItems, ListInvoicesParams, PaymentIntentResponse,
};
use crate::middleware::OwnerContext;
use crate::models::{InvoiceStatus, ListInvoicesFilter};
use crate::startup::AppState;
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

/// Ids that do not parse cannot name an invoice the caller owns.
fn parse_invoice_id(path: Result<Path<Uuid>, PathRejection>) -> Result<Uuid, AppError> {
    path.map(|Path(id)| id)
        .map_err(|_| AppError::NotFound(anyhow::anyhow!("Invoice not found")))
}

pub async fn create_invoice(
    State(state): State<AppState>,
    OwnerContext(owner_id): OwnerContext,
    payload: Result<Json<CreateInvoiceRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(request) =
        payload.map_err(|e| AppError::BadRequest(anyhow::anyhow!(e.body_text())))?;

    let (invoice, items) = state
        .builder
        .create(owner_id, &request)
        .await
        .map_err(|e| e.or_failed("Failed to create invoice"))?;

    let message = if invoice.pdf_url.is_some() {
        "Invoice created successfully"
    } else {
        "Invoice created; document rendering failed"
    };

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::with_message(
            message,
            InvoiceWithItems { invoice, items },
        )),
    ))
}

pub async fn list_invoices(
    State(state): State<AppState>,
    OwnerContext(owner_id): OwnerContext,
    query: Result<Query<ListInvoicesParams>, QueryRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Query(params) =
        query.map_err(|e| AppError::BadRequest(anyhow::anyhow!(e.body_text())))?;

    let status = match params.status.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(InvoiceStatus::from_string(raw).ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!("Unknown invoice status: {}", raw))
        })?),
        None => None,
    };

    let invoices = state
        .repository
        .list_invoices(owner_id, &ListInvoicesFilter { status })
        .await
        .map_err(|e| e.or_failed("Failed to get invoices"))?;

    Ok(Json(ApiResponse::data(invoices)))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    OwnerContext(owner_id): OwnerContext,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<impl IntoResponse, AppError> {
    let invoice_id = parse_invoice_id(path)?;
    let invoice = state
        .repository
        .get_invoice(owner_id, invoice_id)
        .await
        .map_err(|e| e.or_failed("Failed to get invoice"))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

    let items = state
        .repository
        .get_line_items(invoice.invoice_id)
        .await
        .map_err(|e| e.or_failed("Failed to get invoice"))?;

    Ok(Json(ApiResponse::data(InvoiceWithItems { invoice, items })))
}

pub async fn send_invoice(
    State(state): State<AppState>,
    OwnerContext(owner_id): OwnerContext,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<impl IntoResponse, AppError> {
    let invoice_id = parse_invoice_id(path)?;
    let invoice = state
        .delivery
        .send(owner_id, invoice_id)
        .await
        .map_err(|e| e.or_failed("Failed to send invoice"))?;

    Ok(Json(ApiResponse::with_message(
        "Invoice sent successfully",
        invoice,
    )))
}

pub async fn create_payment_intent(
    State(state): State<AppState>,
    OwnerContext(owner_id): OwnerContext,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<impl IntoResponse, AppError> {
    let invoice_id = parse_invoice_id(path)?;
    let intent = state
        .payments
        .create(owner_id, invoice_id)
        .await
        .map_err(|e| e.or_failed("Failed to create payment intent"))?;

    Ok(Json(ApiResponse::data(PaymentIntentResponse {
        client_secret: intent.client_secret,
        payment_intent_id: intent.id,
    })))
}

pub async fn render_invoice(
    State(state): State<AppState>,
    OwnerContext(owner_id): OwnerContext,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<impl IntoResponse, AppError> {
    let invoice_id = parse_invoice_id(path)?;
    let invoice = state
        .builder
        .render(owner_id, invoice_id)
        .await
        .map_err(|e| e.or_failed("Failed to render invoice"))?;

    Ok(Json(ApiResponse::with_message(
        "Invoice document rendered",
        invoice,
    )))
}
