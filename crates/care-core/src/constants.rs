//! Conversation states, user types and command keywords

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a sender currently is in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    #[default]
    New,
    ChoosingUserType,
    PatientAuth,
    StaffAuth,
    PatientMenu,
    StaffMenu,
}

impl ConversationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::ChoosingUserType => "choosing_user_type",
            Self::PatientAuth => "patient_auth",
            Self::StaffAuth => "staff_auth",
            Self::PatientMenu => "patient_menu",
            Self::StaffMenu => "staff_menu",
        }
    }

    /// Parse a stored state. Unrecognised values fall back to `New`.
    pub fn parse(value: &str) -> Self {
        match value {
            "choosing_user_type" => Self::ChoosingUserType,
            "patient_auth" => Self::PatientAuth,
            "staff_auth" => Self::StaffAuth,
            "patient_menu" => Self::PatientMenu,
            "staff_menu" => Self::StaffMenu,
            _ => Self::New,
        }
    }
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who the sender authenticated as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Patient,
    Staff,
    #[default]
    Unknown,
}

impl UserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Patient => "patient",
            Self::Staff => "staff",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "patient" => Self::Patient,
            "staff" => Self::Staff,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for UserType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a logged bot message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageDirection {
    Incoming,
    Outgoing,
}

impl MessageDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incoming => "incoming",
            Self::Outgoing => "outgoing",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "incoming" => Some(Self::Incoming),
            "outgoing" => Some(Self::Outgoing),
            _ => None,
        }
    }
}

/// Typed command keywords
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Help,
    Logout,
    Restart,
    Records,
    Medicines,
    Procedures,
    Appointments,
    Search,
    Notify,
    Patients,
    Back,
    Menu,
}

impl Command {
    /// Match the first word of a message, case-insensitively
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.split_whitespace().next()?.to_lowercase();
        let command = match word.as_str() {
            "help" => Self::Help,
            "logout" => Self::Logout,
            "restart" => Self::Restart,
            "records" => Self::Records,
            "medicines" => Self::Medicines,
            "procedures" => Self::Procedures,
            "appointments" => Self::Appointments,
            "search" => Self::Search,
            "notify" => Self::Notify,
            "patients" => Self::Patients,
            "back" => Self::Back,
            "menu" => Self::Menu,
            _ => return None,
        };
        Some(command)
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Help => "help",
            Self::Logout => "logout",
            Self::Restart => "restart",
            Self::Records => "records",
            Self::Medicines => "medicines",
            Self::Procedures => "procedures",
            Self::Appointments => "appointments",
            Self::Search => "search",
            Self::Notify => "notify",
            Self::Patients => "patients",
            Self::Back => "back",
            Self::Menu => "menu",
        }
    }
}

/// Upper bound for the session timeout and bot token lifetime (one year)
pub const MAX_DURATION_MINUTES: i64 = 525_600;

/// WhatsApp Cloud API limits
pub mod whatsapp {
    pub const DEFAULT_API_VERSION: &str = "v22.0";
    pub const DEFAULT_BASE_URL: &str = "https://graph.facebook.com";
    pub const MAX_TEXT_LENGTH: usize = 4096;
    pub const MAX_BUTTONS: usize = 3;
    pub const MAX_BUTTON_TITLE: usize = 20;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trips_through_str() {
        for state in [
            ConversationState::New,
            ConversationState::ChoosingUserType,
            ConversationState::PatientAuth,
            ConversationState::StaffAuth,
            ConversationState::PatientMenu,
            ConversationState::StaffMenu,
        ] {
            assert_eq!(ConversationState::parse(state.as_str()), state);
        }
    }

    #[test]
    fn test_unknown_state_falls_back_to_new() {
        assert_eq!(ConversationState::parse("records_view"), ConversationState::New);
        assert_eq!(ConversationState::parse(""), ConversationState::New);
    }

    #[test]
    fn test_command_parse_uses_first_word() {
        assert_eq!(Command::parse("  SEARCH P123"), Some(Command::Search));
        assert_eq!(Command::parse("Records"), Some(Command::Records));
        assert_eq!(Command::parse("hello"), None);
        assert_eq!(Command::parse("   "), None);
    }

    #[test]
    fn test_user_type_parse() {
        assert_eq!(UserType::parse("staff"), UserType::Staff);
        assert_eq!(UserType::parse("admin"), UserType::Unknown);
    }
}
