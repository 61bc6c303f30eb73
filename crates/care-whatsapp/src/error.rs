//! Error types for care-whatsapp

use thiserror::Error;

/// care-whatsapp error type
#[derive(Error, Debug)]
pub enum WhatsAppError {
    #[error("WhatsApp API error: {status} - {body}")]
    Api { status: u16, body: String },

    #[error("WhatsApp API request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error(transparent)]
    Core(#[from] care_core::Error),

    #[error(transparent)]
    Care(#[from] care_client::CareError),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, WhatsAppError>;
