//! Admin endpoints for inspecting and resetting sessions
//!
//! Protected by a bearer API key when one is configured.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, Request, State},
    http::{StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use care_core::SessionManager;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tracing::{error, info, warn};

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_MESSAGE_LIMIT: usize = 50;

/// Admin server state
#[derive(Clone)]
pub struct AdminState {
    pub sessions: SessionManager,
    /// `None` leaves the admin routes open
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessagesQuery {
    limit: Option<usize>,
}

/// Create admin router
pub fn create_admin_router(state: AdminState) -> Router {
    let state = Arc::new(state);
    Router::new()
        .route("/admin/sessions", get(list_sessions))
        .route(
            "/admin/sessions/{whatsapp_id}",
            get(get_session).delete(delete_session),
        )
        .route("/admin/sessions/{whatsapp_id}/messages", get(session_messages))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}

/// Bearer API key check
async fn auth_middleware(
    State(state): State<Arc<AdminState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    if validate_api_key(provided, state.api_key.as_deref()) {
        Ok(next.run(request).await)
    } else {
        warn!("Rejected admin request to {}", request.uri().path());
        Err(StatusCode::UNAUTHORIZED)
    }
}

fn validate_api_key(provided: Option<&str>, expected: Option<&str>) -> bool {
    match (provided, expected) {
        (Some(p), Some(e)) => keys_match(p, e),
        (_, None) => true,
        (None, Some(_)) => false,
    }
}

/// Compare MAC tags of both keys with `verify_slice`, which is constant-time
fn keys_match(provided: &str, expected: &str) -> bool {
    let tag = |key: &str| {
        HmacSha256::new_from_slice(expected.as_bytes()).map(|mut mac| {
            mac.update(key.as_bytes());
            mac
        })
    };
    match (tag(provided), tag(expected)) {
        (Ok(provided), Ok(expected)) => provided
            .verify_slice(&expected.finalize().into_bytes())
            .is_ok(),
        _ => false,
    }
}

fn internal_error(e: care_core::Error) -> Response {
    error!("Admin request failed: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "status": "error", "message": e.to_string() })),
    )
        .into_response()
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "status": "error", "message": "Session not found" })),
    )
        .into_response()
}

async fn list_sessions(State(state): State<Arc<AdminState>>) -> Response {
    match state.sessions.list_sessions().await {
        Ok(sessions) => Json(json!({
            "count": sessions.len(),
            "sessions": sessions,
        }))
        .into_response(),
        Err(e) => internal_error(e),
    }
}

async fn get_session(
    State(state): State<Arc<AdminState>>,
    Path(whatsapp_id): Path<String>,
) -> Response {
    match state.sessions.get(&whatsapp_id).await {
        Ok(Some(session)) => Json(session).into_response(),
        Ok(None) => not_found(),
        Err(e) => internal_error(e),
    }
}

async fn session_messages(
    State(state): State<Arc<AdminState>>,
    Path(whatsapp_id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(DEFAULT_MESSAGE_LIMIT);
    match state.sessions.recent_messages(&whatsapp_id, limit).await {
        Ok(messages) => Json(json!({
            "whatsapp_id": whatsapp_id,
            "count": messages.len(),
            "messages": messages,
        }))
        .into_response(),
        Err(e) => internal_error(e),
    }
}

async fn delete_session(
    State(state): State<Arc<AdminState>>,
    Path(whatsapp_id): Path<String>,
) -> Response {
    match state.sessions.delete(&whatsapp_id).await {
        Ok(true) => {
            info!("Deleted session {}", whatsapp_id);
            Json(json!({ "status": "deleted", "whatsapp_id": whatsapp_id })).into_response()
        }
        Ok(false) => not_found(),
        Err(e) => internal_error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use care_core::{ConversationState, MessageDirection};
    use serde_json::Value;
    use tower::ServiceExt;

    async fn sessions() -> SessionManager {
        let sessions = SessionManager::in_memory(30).unwrap();
        sessions
            .update_state("111", ConversationState::ChoosingUserType, None)
            .await
            .unwrap();
        sessions
            .log_message("111", "hi", MessageDirection::Incoming)
            .await;
        sessions
            .log_message("111", "welcome", MessageDirection::Outgoing)
            .await;
        sessions
    }

    fn router(sessions: SessionManager, api_key: Option<&str>) -> Router {
        create_admin_router(AdminState {
            sessions,
            api_key: api_key.map(str::to_string),
        })
    }

    fn request(method: &str, uri: &str, key: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(key) = key {
            builder = builder.header("authorization", format!("Bearer {}", key));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_validate_api_key() {
        assert!(validate_api_key(None, None));
        assert!(validate_api_key(Some("any"), None));
        assert!(!validate_api_key(None, Some("secret")));
        assert!(!validate_api_key(Some("wrong"), Some("secret")));
        assert!(validate_api_key(Some("secret"), Some("secret")));
    }

    #[test]
    fn test_keys_match() {
        assert!(keys_match("admin-key", "admin-key"));
        assert!(!keys_match("admin-ke", "admin-key"));
        assert!(!keys_match("admin-key-2", "admin-key"));
        assert!(!keys_match("", "admin-key"));
        assert!(!keys_match("Admin-key", "admin-key"));
    }

    #[tokio::test]
    async fn test_requires_key_when_configured() {
        let app = router(sessions().await, Some("admin-key"));

        let response = app
            .clone()
            .oneshot(request("GET", "/admin/sessions", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(request("GET", "/admin/sessions", Some("nope")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(request("GET", "/admin/sessions", Some("admin-key")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["sessions"][0]["whatsapp_id"], "111");
        assert!(body["sessions"][0].get("care_token").is_none());
    }

    #[tokio::test]
    async fn test_session_messages_with_limit() {
        let app = router(sessions().await, None);

        let response = app
            .clone()
            .oneshot(request("GET", "/admin/sessions/111/messages?limit=1", None))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["messages"][0]["content"], "welcome");

        let response = app
            .oneshot(request("GET", "/admin/sessions/111/messages", None))
            .await
            .unwrap();
        assert_eq!(json_body(response).await["count"], 2);
    }

    #[tokio::test]
    async fn test_get_and_delete_session() {
        let sessions = sessions().await;
        let app = router(sessions.clone(), None);

        let response = app
            .clone()
            .oneshot(request("GET", "/admin/sessions/111", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["state"], "choosing_user_type");

        let response = app
            .clone()
            .oneshot(request("DELETE", "/admin/sessions/111", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(sessions.get("111").await.unwrap().is_none());
        assert_eq!(sessions.recent_messages("111", 10).await.unwrap().len(), 0);

        let response = app
            .oneshot(request("DELETE", "/admin/sessions/111", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
