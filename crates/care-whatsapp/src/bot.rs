//! WhatsApp bot wrapper
//!
//! Wires configuration into the engine, the API clients and the HTTP
//! server.

use std::future::Future;
use std::net::SocketAddr;

use axum::Router;
use care_client::CareClient;
use care_core::{Config, SessionManager, TokenManager};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::admin::{AdminState, create_admin_router};
use crate::api::WhatsAppClient;
use crate::engine::BotEngine;
use crate::error::{Result, WhatsAppError};
use crate::webhook::{WebhookState, create_webhook_router};

/// WhatsApp bot wrapper
pub struct WhatsAppBot {
    engine: BotEngine,
    whatsapp: WhatsAppClient,
    verify_token: String,
    app_secret: Option<String>,
    admin_api_key: Option<String>,
    port: u16,
}

impl WhatsAppBot {
    /// Create the bot from configuration, opening the session database
    pub fn from_config(config: &Config) -> Result<Self> {
        let sessions = SessionManager::new(&config.session.db_path, config.session.timeout_minutes)?;
        let care = CareClient::new(&config.care_api.base_url, &config.care_api.api_key)?;
        let tokens = TokenManager::new(&config.secret_key, config.session.token_expiry_minutes)?;
        let whatsapp = WhatsAppClient::from_config(&config.whatsapp)?;

        if config.whatsapp.app_secret.is_none() {
            info!("WHATSAPP_APP_SECRET not set, webhook signatures are not checked");
        }

        Ok(Self {
            engine: BotEngine::new(sessions, care, tokens),
            whatsapp,
            verify_token: config.whatsapp.verify_token.clone(),
            app_secret: config.whatsapp.app_secret.clone(),
            admin_api_key: config.server.admin_api_key.clone(),
            port: config.server.port,
        })
    }

    /// Get the WhatsApp client for direct use
    pub fn whatsapp(&self) -> &WhatsAppClient {
        &self.whatsapp
    }

    pub fn sessions(&self) -> &SessionManager {
        self.engine.sessions()
    }

    /// Webhook, health and admin routes
    pub fn router(&self) -> Router {
        let webhook = create_webhook_router(WebhookState {
            engine: self.engine.clone(),
            whatsapp: self.whatsapp.clone(),
            verify_token: self.verify_token.clone(),
            app_secret: self.app_secret.clone(),
        });
        let admin = create_admin_router(AdminState {
            sessions: self.engine.sessions().clone(),
            api_key: self.admin_api_key.clone(),
        });

        webhook.merge(admin).layer(TraceLayer::new_for_http())
    }

    /// Serve until `shutdown` resolves
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| WhatsAppError::Server(format!("Failed to bind {}: {}", addr, e)))?;

        info!("CARE WhatsApp bot listening on {}", addr);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                shutdown.await;
                info!("CARE WhatsApp bot shutting down");
            })
            .await
            .map_err(|e| WhatsAppError::Server(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::collections::HashMap;
    use tower::ServiceExt;

    fn config(db_path: &str) -> Config {
        let vars: HashMap<&str, String> = HashMap::from([
            ("WHATSAPP_ACCESS_TOKEN", "wa-token".to_string()),
            ("WHATSAPP_PHONE_NUMBER_ID", "123".to_string()),
            ("WHATSAPP_WEBHOOK_VERIFY_TOKEN", "verify-me".to_string()),
            ("CARE_API_BASE_URL", "http://care.local".to_string()),
            ("CARE_API_KEY", "care-key".to_string()),
            ("SECRET_KEY", "secret".to_string()),
            ("ADMIN_API_KEY", "admin-key".to_string()),
            ("DB_PATH", db_path.to_string()),
        ]);
        Config::from_lookup(|key| vars.get(key).cloned()).unwrap()
    }

    #[tokio::test]
    async fn test_router_serves_all_routes() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("bot.db");
        let bot = WhatsAppBot::from_config(&config(db_path.to_str().unwrap())).unwrap();
        assert!(db_path.exists());

        let app = bot.router();
        let response = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(Request::get("/admin/sessions").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(
                Request::get("/webhook/whatsapp?hub.mode=subscribe&hub.verify_token=verify-me&hub.challenge=42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
