use crate::dtos::WebhookAck;
use crate::startup::AppState;
use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Payment provider webhook. Takes the body as raw bytes: the signature
/// covers exactly what was sent, so it must not be re-serialized first.
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let outcome = state
        .reconciler
        .handle(&body, signature)
        .await
        .map_err(|e| e.or_failed("Webhook error"))?;

    tracing::debug!(outcome = ?outcome, "Webhook processed");

    Ok(Json(WebhookAck { received: true }))
}
