//! Session types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::{ConversationState, MessageDirection, UserType};

/// Conversation session for one WhatsApp sender
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSession {
    /// WhatsApp id (phone number) of the sender
    pub whatsapp_id: String,
    pub user_type: UserType,
    pub state: ConversationState,
    /// Free-form session data (`user_id`, `staff_name`, ...)
    pub data: Map<String, Value>,
    pub is_authenticated: bool,
    /// Bot session token
    #[serde(skip_serializing)]
    pub auth_token: Option<String>,
    /// CARE access token
    #[serde(skip_serializing)]
    pub care_token: Option<String>,
    /// CARE refresh token
    #[serde(skip_serializing)]
    pub care_refresh_token: Option<String>,
    pub last_activity: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Tokens stored on authentication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTokens {
    pub bot_token: String,
    pub care_token: String,
    pub care_refresh_token: Option<String>,
}

impl UserSession {
    pub fn new(whatsapp_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            whatsapp_id: whatsapp_id.into(),
            user_type: UserType::Unknown,
            state: ConversationState::New,
            data: Map::new(),
            is_authenticated: false,
            auth_token: None,
            care_token: None,
            care_refresh_token: None,
            last_activity: now,
            created_at: now,
        }
    }

    /// Idle for longer than `timeout` as of `now`
    pub fn is_expired(&self, timeout: Duration, now: DateTime<Utc>) -> bool {
        now - self.last_activity > timeout
    }

    /// Back to a fresh, unauthenticated conversation
    pub fn reset(&mut self) {
        self.user_type = UserType::Unknown;
        self.state = ConversationState::New;
        self.data.clear();
        self.is_authenticated = false;
        self.auth_token = None;
        self.care_token = None;
        self.care_refresh_token = None;
        self.touch();
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    pub fn merge_data(&mut self, data: Map<String, Value>) {
        self.data.extend(data);
    }

    /// String value from session data, if present and non-empty
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data
            .get(key)
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn apply_tokens(&mut self, tokens: SessionTokens) {
        self.auth_token = Some(tokens.bot_token);
        self.care_token = Some(tokens.care_token);
        self.care_refresh_token = tokens.care_refresh_token;
    }
}

/// Logged message, incoming or outgoing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotMessage {
    pub id: i64,
    pub whatsapp_id: String,
    pub direction: MessageDirection,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_session() {
        let session = UserSession::new("919876543210");
        assert_eq!(session.state, ConversationState::New);
        assert_eq!(session.user_type, UserType::Unknown);
        assert!(!session.is_authenticated);
        assert!(session.data.is_empty());
    }

    #[test]
    fn test_is_expired() {
        let session = UserSession::new("1");
        let timeout = Duration::minutes(30);
        assert!(!session.is_expired(timeout, session.last_activity + Duration::minutes(30)));
        assert!(session.is_expired(timeout, session.last_activity + Duration::minutes(31)));
    }

    #[test]
    fn test_reset_clears_auth() {
        let mut session = UserSession::new("1");
        session.user_type = UserType::Staff;
        session.state = ConversationState::StaffMenu;
        session.is_authenticated = true;
        session.data.insert("user_id".to_string(), json!("STAFF1"));
        session.apply_tokens(SessionTokens {
            bot_token: "bot".to_string(),
            care_token: "care".to_string(),
            care_refresh_token: Some("refresh".to_string()),
        });

        session.reset();

        assert_eq!(session.state, ConversationState::New);
        assert_eq!(session.user_type, UserType::Unknown);
        assert!(!session.is_authenticated);
        assert!(session.data.is_empty());
        assert!(session.auth_token.is_none());
        assert!(session.care_token.is_none());
        assert!(session.care_refresh_token.is_none());
    }

    #[test]
    fn test_data_str_skips_empty_and_non_strings() {
        let mut session = UserSession::new("1");
        session.data.insert("user_id".to_string(), json!(""));
        session.data.insert("count".to_string(), json!(3));
        session.data.insert("name".to_string(), json!("Asha"));

        assert_eq!(session.data_str("user_id"), None);
        assert_eq!(session.data_str("count"), None);
        assert_eq!(session.data_str("name"), Some("Asha"));
    }
}
