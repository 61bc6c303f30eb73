//! care-core: shared foundation for the CARE WhatsApp bot
//!
//! Configuration, error types, conversation constants, persistent
//! session storage, bot session tokens and outbound rate limiting.

pub mod config;
pub mod constants;
pub mod error;
pub mod rate_limit;
pub mod session;
pub mod token;

pub use config::{CareApiConfig, Config, ServerConfig, SessionConfig, WhatsAppConfig};
pub use constants::{Command, ConversationState, MessageDirection, UserType};
pub use error::{Error, Result};
pub use rate_limit::{RateLimiter, RateLimiters};
pub use session::{BotMessage, SessionManager, SessionStore, SessionTokens, UserSession};
pub use token::{Claims, TokenManager};
