//! Error types for care-client

use thiserror::Error;

/// care-client error type
#[derive(Error, Debug)]
pub enum CareError {
    #[error("CARE API error: {status} - {body}")]
    Status { status: u16, body: String },

    #[error("CARE API rejected the access token")]
    Unauthorized,

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Invalid patient id: {0:?}")]
    InvalidPatientId(String),

    #[error("Invalid CARE API base URL: {0}")]
    InvalidUrl(String),

    #[error("CARE API request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid CARE API response: {0}")]
    Json(#[from] serde_json::Error),
}

impl CareError {
    /// The credentials were refused, as opposed to the API being unreachable
    pub fn is_auth_rejection(&self) -> bool {
        match self {
            Self::Unauthorized | Self::AuthenticationFailed(_) | Self::InvalidPatientId(_) => true,
            Self::Status { status, .. } => matches!(status, 400 | 403 | 404),
            _ => false,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, CareError>;
