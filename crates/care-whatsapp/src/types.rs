//! WhatsApp Cloud API webhook types
//!
//! Every field is optional or defaulted; Meta omits whatever does not
//! apply to a given notification.

use serde::{Deserialize, Serialize};

/// Webhook request body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub entry: Vec<Entry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Entry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub changes: Vec<Change>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Change {
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub value: Option<ChangeValue>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeValue {
    #[serde(default)]
    pub messaging_product: Option<String>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
    #[serde(default)]
    pub contacts: Vec<Contact>,
    #[serde(default)]
    pub messages: Vec<InboundMessage>,
    #[serde(default)]
    pub statuses: Vec<MessageStatus>,
}

impl ChangeValue {
    /// Profile name for a sender, if the contact list carries one
    pub fn contact_name(&self, wa_id: &str) -> Option<&str> {
        self.contacts
            .iter()
            .find(|c| c.wa_id.as_deref() == Some(wa_id))
            .and_then(|c| c.profile.as_ref())
            .and_then(|p| p.name.as_deref())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub display_phone_number: Option<String>,
    #[serde(default)]
    pub phone_number_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Contact {
    #[serde(default)]
    pub wa_id: Option<String>,
    #[serde(default)]
    pub profile: Option<Profile>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub name: Option<String>,
}

/// Incoming user message
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(rename = "type", default)]
    pub message_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<TextBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interactive: Option<Interactive>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button: Option<QuickReply>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextBody {
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Interactive {
    #[serde(rename = "type", default)]
    pub interactive_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button_reply: Option<ReplyItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_reply: Option<ReplyItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplyItem {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
}

/// Template quick-reply button press
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuickReply {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub payload: Option<String>,
}

/// Delivery status update for a message we sent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageStatus {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub recipient_id: Option<String>,
}

/// What an inbound message asks the bot to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    Text(String),
    ButtonReply(String),
    ListReply(String),
    QuickReplyButton(String),
    Unsupported(String),
}

impl InboundMessage {
    pub fn kind(&self) -> MessageKind {
        match self.message_type.as_str() {
            "text" => MessageKind::Text(
                self.text.as_ref().map(|t| t.body.clone()).unwrap_or_default(),
            ),
            "interactive" => match self.interactive.as_ref() {
                Some(i) if i.interactive_type == "button_reply" => MessageKind::ButtonReply(
                    i.button_reply.as_ref().map(|r| r.id.clone()).unwrap_or_default(),
                ),
                Some(i) if i.interactive_type == "list_reply" => MessageKind::ListReply(
                    i.list_reply.as_ref().map(|r| r.id.clone()).unwrap_or_default(),
                ),
                Some(i) => MessageKind::Unsupported(format!("interactive/{}", i.interactive_type)),
                None => MessageKind::Unsupported("interactive".to_string()),
            },
            "button" => MessageKind::QuickReplyButton(
                self.button.as_ref().map(|b| b.text.clone()).unwrap_or_default(),
            ),
            other => MessageKind::Unsupported(other.to_string()),
        }
    }
}
