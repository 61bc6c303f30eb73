//! care-whatsapp: WhatsApp front end for the CARE platform
//!
//! This crate talks to the WhatsApp Cloud API, runs the conversation
//! engine that authenticates patients and staff against CARE, and serves
//! the webhook and admin endpoints.

pub mod admin;
pub mod api;
pub mod bot;
pub mod engine;
pub mod error;
pub mod format;
pub mod types;
pub mod webhook;

pub use api::{Button, PhoneNumberInfo, SendResponse, WhatsAppClient};
pub use bot::WhatsAppBot;
pub use engine::{BotEngine, Reply};
pub use error::{Result, WhatsAppError};
pub use types::{InboundMessage, MessageKind, WebhookPayload};
