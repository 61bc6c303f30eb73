//! Session management

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::duration_minutes;
use crate::constants::{ConversationState, MessageDirection, UserType};
use crate::session::{BotMessage, SessionStore, SessionTokens, UserSession};
use crate::Result;

/// Session manager that handles the conversation lifecycle
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<Mutex<SessionStore>>,
    /// Idle time after which a session starts over
    timeout: Duration,
}

impl SessionManager {
    /// Create a new session manager with a database path
    pub fn new(db_path: &str, timeout_minutes: i64) -> Result<Self> {
        let store = SessionStore::new(db_path)?;
        info!("Session store opened at {}", db_path);
        Self::with_store(store, timeout_minutes)
    }

    /// Create an in-memory session manager (for testing)
    pub fn in_memory(timeout_minutes: i64) -> Result<Self> {
        Self::with_store(SessionStore::in_memory()?, timeout_minutes)
    }

    fn with_store(store: SessionStore, timeout_minutes: i64) -> Result<Self> {
        Ok(Self {
            store: Arc::new(Mutex::new(store)),
            timeout: duration_minutes("SESSION_TIMEOUT_MINUTES", timeout_minutes)?,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Get the sender's session, creating it if absent
    ///
    /// Sessions idle past the timeout are reset before being returned.
    pub async fn get_or_create(&self, whatsapp_id: &str) -> Result<UserSession> {
        let store = self.store.lock().await;

        match store.get(whatsapp_id)? {
            Some(mut session) => {
                if session.is_expired(self.timeout, Utc::now()) {
                    info!("Session expired for {}, starting over", whatsapp_id);
                    session.reset();
                    store.save(&session)?;
                }
                Ok(session)
            }
            None => {
                info!("Creating new session for {}", whatsapp_id);
                let session = UserSession::new(whatsapp_id);
                store.save(&session)?;
                Ok(session)
            }
        }
    }

    /// Move to `state`, merging `data` into the session data
    pub async fn update_state(
        &self,
        whatsapp_id: &str,
        state: ConversationState,
        data: Option<Map<String, Value>>,
    ) -> Result<UserSession> {
        self.modify(whatsapp_id, |session| {
            debug!("{}: {} -> {}", whatsapp_id, session.state, state);
            session.state = state;
            if let Some(data) = data {
                session.merge_data(data);
            }
        })
        .await
    }

    /// Mark the session authenticated and store the tokens
    pub async fn authenticate(
        &self,
        whatsapp_id: &str,
        user_type: UserType,
        user_id: &str,
        tokens: SessionTokens,
    ) -> Result<UserSession> {
        let session = self
            .modify(whatsapp_id, |session| {
                session.is_authenticated = true;
                session.user_type = user_type;
                session
                    .data
                    .insert("user_id".to_string(), Value::String(user_id.to_string()));
                session.apply_tokens(tokens);
            })
            .await?;
        info!("Authenticated {} as {} {}", whatsapp_id, user_type, user_id);
        Ok(session)
    }

    /// Replace the CARE tokens after a refresh
    pub async fn update_tokens(
        &self,
        whatsapp_id: &str,
        care_token: &str,
        care_refresh_token: Option<&str>,
    ) -> Result<UserSession> {
        self.modify(whatsapp_id, |session| {
            session.care_token = Some(care_token.to_string());
            if let Some(refresh) = care_refresh_token {
                session.care_refresh_token = Some(refresh.to_string());
            }
        })
        .await
    }

    /// Replace the bot session token (sliding expiry)
    pub async fn update_bot_token(&self, whatsapp_id: &str, token: &str) -> Result<()> {
        self.modify(whatsapp_id, |session| {
            session.auth_token = Some(token.to_string());
        })
        .await?;
        Ok(())
    }

    pub async fn set_data(&self, whatsapp_id: &str, key: &str, value: Value) -> Result<()> {
        self.modify(whatsapp_id, |session| {
            session.data.insert(key.to_string(), value);
        })
        .await?;
        Ok(())
    }

    pub async fn get_data(&self, whatsapp_id: &str, key: &str) -> Result<Option<Value>> {
        let store = self.store.lock().await;
        Ok(store
            .get(whatsapp_id)?
            .and_then(|session| session.data.get(key).cloned()))
    }

    /// Log out: back to a fresh, unauthenticated session
    pub async fn clear(&self, whatsapp_id: &str) -> Result<UserSession> {
        let session = self.modify(whatsapp_id, UserSession::reset).await?;
        info!("Cleared session for {}", whatsapp_id);
        Ok(session)
    }

    /// Refresh `last_activity`
    pub async fn touch(&self, whatsapp_id: &str) -> Result<()> {
        self.modify(whatsapp_id, |_| {}).await?;
        Ok(())
    }

    /// Append to the message log; failures are only logged
    pub async fn log_message(&self, whatsapp_id: &str, content: &str, direction: MessageDirection) {
        let store = self.store.lock().await;
        if let Err(e) = store.insert_message(whatsapp_id, direction, content, Utc::now()) {
            warn!("Failed to log {} message for {}: {}", direction.as_str(), whatsapp_id, e);
        }
    }

    pub async fn list_sessions(&self) -> Result<Vec<UserSession>> {
        self.store.lock().await.list()
    }

    pub async fn get(&self, whatsapp_id: &str) -> Result<Option<UserSession>> {
        self.store.lock().await.get(whatsapp_id)
    }

    /// Newest messages first
    pub async fn recent_messages(&self, whatsapp_id: &str, limit: usize) -> Result<Vec<BotMessage>> {
        self.store.lock().await.recent_messages(whatsapp_id, limit)
    }

    /// Delete a session and its message log
    pub async fn delete(&self, whatsapp_id: &str) -> Result<bool> {
        let deleted = self.store.lock().await.delete(whatsapp_id)?;
        if deleted {
            info!("Deleted session for {}", whatsapp_id);
        }
        Ok(deleted)
    }

    /// Load (or create) a session, apply `f`, touch and save it
    async fn modify<F>(&self, whatsapp_id: &str, f: F) -> Result<UserSession>
    where
        F: FnOnce(&mut UserSession),
    {
        let store = self.store.lock().await;
        let mut session = store
            .get(whatsapp_id)?
            .unwrap_or_else(|| UserSession::new(whatsapp_id));
        f(&mut session);
        session.touch();
        store.save(&session)?;
        Ok(session)
    }
}
