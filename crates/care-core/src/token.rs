//! Bot session tokens
//!
//! HS256 JSON Web Tokens minted when a sender authenticates. They bound
//! how long an authenticated WhatsApp session stays usable and are
//! re-issued on activity.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, warn};

use crate::config::duration_minutes;
use crate::constants::UserType;
use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Token payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    pub user_type: UserType,
    /// Expiry, seconds since the epoch
    pub exp: i64,
    /// Issued at, seconds since the epoch
    pub iat: i64,
    /// Unique token id (millisecond timestamp)
    pub jti: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

/// Issues and checks bot session tokens
#[derive(Clone)]
pub struct TokenManager {
    secret: Vec<u8>,
    lifetime: Duration,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    pub fn new(secret: &str, lifetime_minutes: i64) -> Result<Self> {
        Ok(Self {
            secret: secret.as_bytes().to_vec(),
            lifetime: duration_minutes("TOKEN_EXPIRY_MINUTES", lifetime_minutes)?,
        })
    }

    /// Issue a token for an authenticated user
    pub fn generate(&self, user_id: &str, user_type: UserType) -> Result<String> {
        self.generate_at(user_id, user_type, Utc::now())
    }

    /// Issue a token as if the current time were `now`
    pub fn generate_at(&self, user_id: &str, user_type: UserType, now: DateTime<Utc>) -> Result<String> {
        let claims = Claims {
            user_id: user_id.to_string(),
            user_type,
            exp: (now + self.lifetime).timestamp(),
            iat: now.timestamp(),
            jti: now.timestamp_millis().to_string(),
        };
        let token = self.sign(&claims)?;
        debug!("Generated token for {} user {}", user_type, user_id);
        Ok(token)
    }

    /// Check signature and expiry, returning the claims
    pub fn validate(&self, token: &str) -> Result<Claims> {
        self.validate_at(token, Utc::now())
    }

    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims> {
        let malformed = || Error::InvalidToken("malformed token".to_string());
        let (signing_input, signature) = token.rsplit_once('.').ok_or_else(malformed)?;
        let (header, payload) = signing_input.split_once('.').ok_or_else(malformed)?;
        if payload.contains('.') {
            return Err(malformed());
        }

        let header: Header = decode_segment(header)?;
        if header.alg != "HS256" {
            return Err(Error::InvalidToken(format!("unsupported algorithm {}", header.alg)));
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|e| Error::InvalidToken(format!("bad signature encoding: {}", e)))?;
        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| Error::InvalidToken("signature mismatch".to_string()))?;

        let claims: Claims = decode_segment(payload)?;
        if claims.exp <= now.timestamp() {
            warn!("Token has expired for user {}", claims.user_id);
            return Err(Error::TokenExpired);
        }

        Ok(claims)
    }

    /// True for expired and for invalid tokens
    pub fn is_expired(&self, token: &str) -> bool {
        self.validate(token).is_err()
    }

    /// Re-issue a still-valid token with a new expiry
    pub fn refresh(&self, token: &str) -> Result<String> {
        self.refresh_at(token, Utc::now())
    }

    pub fn refresh_at(&self, token: &str, now: DateTime<Utc>) -> Result<String> {
        let mut claims = self.validate_at(token, now).inspect_err(|e| {
            warn!("Cannot refresh invalid token: {}", e);
        })?;

        claims.exp = (now + self.lifetime).timestamp();
        claims.iat = now.timestamp();
        claims.jti = now.timestamp_millis().to_string();

        let token = self.sign(&claims)?;
        debug!("Refreshed token for {} user {}", claims.user_type, claims.user_id);
        Ok(token)
    }

    fn sign(&self, claims: &Claims) -> Result<String> {
        let header = Header {
            alg: "HS256".to_string(),
            typ: "JWT".to_string(),
        };
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?),
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?),
        );

        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{}.{}", signing_input, signature))
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| Error::InvalidToken(format!("bad signing key: {}", e)))
    }
}

fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str) -> Result<T> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| Error::InvalidToken(format!("bad encoding: {}", e)))?;
    serde_json::from_slice(&bytes).map_err(|e| Error::InvalidToken(format!("bad segment: {}", e)))
}
