//! WhatsApp Cloud API client

use std::time::Duration;

use care_core::constants::whatsapp::{MAX_BUTTON_TITLE, MAX_BUTTONS, MAX_TEXT_LENGTH};
use care_core::rate_limit::{WHATSAPP_READ, WHATSAPP_SEND};
use care_core::{RateLimiters, WhatsAppConfig};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::error::{Result, WhatsAppError};
use crate::format::split_text;

const PHONE_NUMBER_FIELDS: &str =
    "id,display_phone_number,verified_name,quality_rating,code_verification_status";

/// Reply button shown under an interactive message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub id: String,
    pub title: String,
}

impl Button {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }
}

/// Response to a message send
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendResponse {
    #[serde(default)]
    pub messaging_product: Option<String>,
    #[serde(default)]
    pub contacts: Vec<SentContact>,
    #[serde(default)]
    pub messages: Vec<SentMessage>,
}

impl SendResponse {
    pub fn message_id(&self) -> Option<&str> {
        self.messages.first().map(|m| m.id.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SentContact {
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub wa_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SentMessage {
    #[serde(default)]
    pub id: String,
}

/// Business phone number resource
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PhoneNumberInfo {
    pub id: String,
    pub display_phone_number: String,
    pub verified_name: String,
    pub quality_rating: String,
    pub code_verification_status: String,
}

/// WhatsApp Cloud API client
#[derive(Clone)]
pub struct WhatsAppClient {
    client: Client,
    base_url: String,
    api_version: String,
    phone_number_id: String,
    access_token: String,
    limiters: RateLimiters,
}

impl WhatsAppClient {
    /// Create a new WhatsApp Cloud API client
    pub fn new(
        access_token: &str,
        phone_number_id: &str,
        api_version: &str,
        base_url: &str,
    ) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_version: api_version.trim_matches('/').to_string(),
            phone_number_id: phone_number_id.to_string(),
            access_token: access_token.to_string(),
            limiters: RateLimiters::default(),
        })
    }

    pub fn from_config(config: &WhatsAppConfig) -> Result<Self> {
        Self::new(
            &config.access_token,
            &config.phone_number_id,
            &config.api_version,
            &config.base_url,
        )
    }

    /// Replace the rate limiter registry
    pub fn with_rate_limiters(mut self, limiters: RateLimiters) -> Self {
        self.limiters = limiters;
        self
    }

    fn phone_url(&self) -> String {
        format!("{}/{}/{}", self.base_url, self.api_version, self.phone_number_id)
    }

    fn messages_url(&self) -> String {
        format!("{}/messages", self.phone_url())
    }

    async fn post_message(&self, payload: &Value, bucket: &str) -> Result<Value> {
        self.limiters.acquire(bucket).await;

        let response = self
            .client
            .post(self.messages_url())
            .bearer_auth(&self.access_token)
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("WhatsApp API error: {} - {}", status, body);
            return Err(WhatsAppError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(json!({}));
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn send(&self, payload: Value) -> Result<SendResponse> {
        let value = self.post_message(&payload, WHATSAPP_SEND).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Send a text message, split into several when longer than the API limit
    ///
    /// Returns the ids of the sent messages.
    pub async fn send_text(&self, to: &str, body: &str) -> Result<Vec<String>> {
        let to = normalize_recipient(to);
        let chunks = split_text(body, MAX_TEXT_LENGTH);
        if chunks.len() > 1 {
            debug!("Splitting message to {} into {} parts", to, chunks.len());
        }

        let mut ids = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let response = self
                .send(json!({
                    "messaging_product": "whatsapp",
                    "recipient_type": "individual",
                    "to": to,
                    "type": "text",
                    "text": { "preview_url": false, "body": chunk },
                }))
                .await?;
            ids.extend(response.message_id().map(str::to_string));
        }

        info!("Message sent successfully to {}", to);
        Ok(ids)
    }

    /// Send a pre-approved template message
    pub async fn send_template(&self, to: &str, name: &str, language: &str) -> Result<SendResponse> {
        let to = normalize_recipient(to);
        let response = self
            .send(json!({
                "messaging_product": "whatsapp",
                "to": to,
                "type": "template",
                "template": {
                    "name": name,
                    "language": { "code": language },
                },
            }))
            .await?;

        info!("Template message '{}' sent to {}", name, to);
        Ok(response)
    }

    /// Send a message with up to three reply buttons
    pub async fn send_buttons(&self, to: &str, body: &str, buttons: &[Button]) -> Result<SendResponse> {
        if buttons.is_empty() {
            return Err(WhatsAppError::InvalidMessage(
                "interactive message needs at least one button".to_string(),
            ));
        }
        if buttons.len() > MAX_BUTTONS {
            warn!("Only the first {} of {} buttons are sent", MAX_BUTTONS, buttons.len());
        }

        let to = normalize_recipient(to);
        let response = self
            .send(json!({
                "messaging_product": "whatsapp",
                "to": to,
                "type": "interactive",
                "interactive": {
                    "type": "button",
                    "body": { "text": body },
                    "action": { "buttons": reply_buttons(buttons) },
                },
            }))
            .await?;

        info!("Interactive message sent to {}", to);
        Ok(response)
    }

    /// Mark an incoming message as read; failures are only logged
    pub async fn mark_as_read(&self, message_id: &str) -> bool {
        let payload = json!({
            "messaging_product": "whatsapp",
            "status": "read",
            "message_id": message_id,
        });

        match self.post_message(&payload, WHATSAPP_READ).await {
            Ok(_) => {
                debug!("Message {} marked as read", message_id);
                true
            }
            Err(e) => {
                error!("Error marking message as read: {}", e);
                false
            }
        }
    }

    /// Fetch the phone number resource (used to check the access token)
    pub async fn phone_number_info(&self) -> Result<PhoneNumberInfo> {
        let response = self
            .client
            .get(self.phone_url())
            .bearer_auth(&self.access_token)
            .query(&[("fields", PHONE_NUMBER_FIELDS)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WhatsAppError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }
}

/// Recipient numbers go out without the leading `+`
fn normalize_recipient(to: &str) -> String {
    to.trim().replace('+', "")
}

fn reply_buttons(buttons: &[Button]) -> Vec<Value> {
    buttons
        .iter()
        .take(MAX_BUTTONS)
        .enumerate()
        .map(|(i, button)| {
            json!({
                "type": "reply",
                "reply": {
                    "id": format!("btn_{}_{}", i, button.id),
                    "title": button.title.chars().take(MAX_BUTTON_TITLE).collect::<String>(),
                },
            })
        })
        .collect()
}
