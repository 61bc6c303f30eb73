//! Webhook endpoints for the WhatsApp Cloud API
//!
//! Handles the subscription handshake and incoming message notifications.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use hmac::{Hmac, Mac};
use serde_json::{Value, json};
use sha2::Sha256;
use tracing::{debug, error, info, warn};

use crate::api::WhatsAppClient;
use crate::engine::{BotEngine, Reply};
use crate::types::{ChangeValue, InboundMessage, WebhookPayload};

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Webhook server state
#[derive(Clone)]
pub struct WebhookState {
    pub engine: BotEngine,
    pub whatsapp: WhatsAppClient,
    pub verify_token: String,
    /// When set, POST bodies must carry a valid `X-Hub-Signature-256`
    pub app_secret: Option<String>,
}

/// Create webhook router (`/webhook/whatsapp` and `/health`)
pub fn create_webhook_router(state: WebhookState) -> Router {
    Router::new()
        .route("/webhook/whatsapp", get(verify_webhook).post(handle_webhook))
        .route("/health", get(health))
        .with_state(Arc::new(state))
}

async fn health() -> &'static str {
    "OK"
}

/// Subscription handshake
async fn verify_webhook(
    State(state): State<Arc<WebhookState>>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, String) {
    let (Some(mode), Some(token), Some(challenge)) = (
        params.get("hub.mode"),
        params.get("hub.verify_token"),
        params.get("hub.challenge"),
    ) else {
        warn!("Webhook verification request with missing parameters");
        return (StatusCode::BAD_REQUEST, "Missing parameters".to_string());
    };

    if mode == "subscribe" && *token == state.verify_token {
        info!("Webhook verified successfully");
        (StatusCode::OK, challenge.clone())
    } else {
        warn!("Webhook verification failed (mode: {})", mode);
        (StatusCode::FORBIDDEN, "Verification failed".to_string())
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "status": "error", "message": message }))).into_response()
}

/// Handle incoming webhook notification
async fn handle_webhook(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(secret) = state.app_secret.as_deref() {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok());
        let valid = signature.is_some_and(|s| verify_signature(secret, &body, s));
        if !valid {
            warn!("Rejected webhook with missing or invalid signature");
            return error_response(StatusCode::UNAUTHORIZED, "Invalid signature");
        }
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !content_type.starts_with("application/json") {
        warn!("Invalid content type: {}", content_type);
        return error_response(StatusCode::BAD_REQUEST, "Invalid content type");
    }

    let value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            warn!("Failed to parse webhook body: {}", e);
            return error_response(StatusCode::BAD_REQUEST, "Invalid JSON");
        }
    };
    if value.get("entry").is_none() {
        warn!("Webhook body without entry field");
        return error_response(StatusCode::BAD_REQUEST, "Missing entry field");
    }
    debug!("Received webhook: {}", value);

    let payload: WebhookPayload = match serde_json::from_value(value) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Unexpected webhook structure: {}", e);
            return error_response(StatusCode::BAD_REQUEST, "Invalid JSON");
        }
    };

    let status = if process_payload(&state, &payload).await {
        "ok"
    } else {
        "no_messages"
    };
    Json(json!({ "status": status })).into_response()
}

/// Returns true when at least one `messages` change was processed
async fn process_payload(state: &WebhookState, payload: &WebhookPayload) -> bool {
    let mut processed = false;

    for entry in &payload.entry {
        for change in &entry.changes {
            if change.field.as_deref() != Some("messages") {
                debug!("Skipping change for field {:?}", change.field);
                continue;
            }
            let Some(value) = change.value.as_ref() else {
                continue;
            };
            processed = true;

            for status in &value.statuses {
                debug!(
                    "Message {} status: {} (recipient {:?})",
                    status.id, status.status, status.recipient_id
                );
            }
            for message in &value.messages {
                handle_message(state, value, message).await;
            }
        }
    }

    processed
}

async fn handle_message(state: &WebhookState, value: &ChangeValue, message: &InboundMessage) {
    let from = message.from.as_str();
    if from.is_empty() {
        warn!("Message {} has no sender", message.id);
        return;
    }
    match value.contact_name(from) {
        Some(name) => info!("Received {} message from {} ({})", message.message_type, from, name),
        None => info!("Received {} message from {}", message.message_type, from),
    }

    if let Some(reply) = state.engine.handle(from, message).await {
        let sent = match &reply {
            Reply::Text(body) => state.whatsapp.send_text(from, body).await.map(|_| ()),
            Reply::Buttons { body, buttons } => state
                .whatsapp
                .send_buttons(from, body, buttons)
                .await
                .map(|_| ()),
        };
        if let Err(e) = sent {
            error!("Failed to send reply to {}: {}", from, e);
        }
    }

    if !message.id.is_empty() {
        state.whatsapp.mark_as_read(&message.id).await;
    }
}

/// Verify `sha256=<hex>` against the HMAC-SHA256 of the raw body
fn verify_signature(app_secret: &str, body: &[u8], signature: &str) -> bool {
    let Some(hex_digest) = signature.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };
    let mut mac = match HmacSha256::new_from_slice(app_secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };

    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}
