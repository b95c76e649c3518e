use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::AppState;
use crate::error::ShopError;
use crate::webhook::dedup::{Delivery, DeliveryGuard};
use crate::webhook::{body_digest, cryptopay, delivery_key, tribute, verify_signature};

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("method not allowed")]
    Method,
    #[error("provider is not enabled")]
    Disabled,
    #[error("missing or invalid signature")]
    BadSignature,
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("processing failed: {0}")]
    Processing(String),
}

impl From<ShopError> for WebhookError {
    fn from(e: ShopError) -> Self {
        WebhookError::Processing(e.to_string())
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::Method => StatusCode::METHOD_NOT_ALLOWED,
            WebhookError::Disabled => StatusCode::NOT_FOUND,
            WebhookError::BadSignature => StatusCode::UNAUTHORIZED,
            WebhookError::Malformed(_) => StatusCode::BAD_REQUEST,
            WebhookError::Processing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        match &self {
            WebhookError::Processing(_) => error!("Webhook failed: {}", self),
            _ => warn!("Webhook rejected: {}", self),
        }
        (status, self.to_string()).into_response()
    }
}

pub async fn method_not_allowed() -> WebhookError {
    WebhookError::Method
}

fn authenticate(
    headers: &HeaderMap,
    header: &str,
    secret: &[u8],
    body: &[u8],
) -> Result<(), WebhookError> {
    let signature = headers
        .get(header)
        .and_then(|h| h.to_str().ok())
        .ok_or(WebhookError::BadSignature)?;
    if verify_signature(secret, body, signature) {
        Ok(())
    } else {
        Err(WebhookError::BadSignature)
    }
}

/// `None` means the body was already processed. A concurrent copy of a body
/// still being processed gets a 500 so the sender retries it after the first
/// attempt settles.
fn claim(state: &AppState, body: &[u8]) -> Result<Option<DeliveryGuard>, WebhookError> {
    match state.dedup.begin(body_digest(body)) {
        Delivery::Fresh(guard) => Ok(Some(guard)),
        Delivery::Duplicate => {
            info!("Duplicate webhook delivery ignored");
            Ok(None)
        }
        Delivery::InFlight => Err(WebhookError::Processing(
            "same delivery is still being processed".into(),
        )),
    }
}

pub async fn tribute_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, WebhookError> {
    let secret = state
        .config
        .tribute
        .as_ref()
        .map(|t| t.api_key.clone())
        .ok_or(WebhookError::Disabled)?;
    authenticate(&headers, tribute::SIGNATURE_HEADER, secret.as_bytes(), &body)?;

    let Some(guard) = claim(&state, &body)? else {
        return Ok(StatusCode::OK);
    };
    let event = tribute::parse_event(&body)?;

    match event {
        tribute::SubscriptionEvent::Paid {
            telegram_id,
            amount,
            currency,
            months,
        } => {
            if !currency.is_empty() && !currency.eq_ignore_ascii_case(&state.config.currency) {
                warn!(
                    "Subscription paid in {} while the shop uses {}",
                    currency, state.config.currency
                );
            }
            let outcome = state
                .pay_service
                .complete_external_subscription(telegram_id, amount, months, &delivery_key(&body))
                .await?;
            info!(telegram_id, months, "Subscription webhook processed: {:?}", outcome);
        }
        tribute::SubscriptionEvent::Cancelled { telegram_id } => {
            let cancelled = state
                .pay_service
                .cancel_external_subscription(telegram_id)
                .await?;
            info!(telegram_id, cancelled, "Subscription cancelled");
        }
        tribute::SubscriptionEvent::Ignored(name) => {
            debug!("Ignoring subscription event '{}'", name);
        }
    }

    guard.complete();
    Ok(StatusCode::OK)
}

pub async fn cryptopay_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, WebhookError> {
    let secret = state
        .config
        .crypto_pay
        .as_ref()
        .map(|c| cryptopay::signing_secret(&c.token))
        .ok_or(WebhookError::Disabled)?;
    authenticate(&headers, cryptopay::SIGNATURE_HEADER, &secret, &body)?;

    let Some(guard) = claim(&state, &body)? else {
        return Ok(StatusCode::OK);
    };

    match cryptopay::parse_event(&body)? {
        cryptopay::InvoiceEvent::Paid {
            purchase_id,
            invoice_id,
        } => {
            let outcome = state.pay_service.process_purchase_by_id(purchase_id).await?;
            info!(purchase_id, invoice_id, "Crypto invoice processed: {:?}", outcome);
        }
        cryptopay::InvoiceEvent::Ignored(what) => debug!("Ignoring crypto update: {}", what),
    }

    guard.complete();
    Ok(StatusCode::OK)
}
