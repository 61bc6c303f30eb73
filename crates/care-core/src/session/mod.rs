//! Session management module
//!
//! Per-sender conversation state and the message log, persisted in SQLite.

mod manager;
mod store;
mod types;

pub use manager::SessionManager;
pub use store::SessionStore;
pub use types::{BotMessage, SessionTokens, UserSession};
