//! Conversation engine
//!
//! Turns one inbound WhatsApp message into at most one reply, driving the
//! per-sender state machine:
//!
//! ```text
//! new -> choosing_user_type -> patient_auth -> patient_menu
//!                           \-> staff_auth   -> staff_menu
//! ```
//!
//! `logout`, `restart` and `help` work from any state.

use care_client::{CareClient, CareError, is_valid_patient_id};
use care_core::{
    Command, ConversationState, MessageDirection, SessionManager, SessionTokens, TokenManager,
    UserSession, UserType,
};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::api::Button;
use crate::error::Result;
use crate::format;
use crate::types::{InboundMessage, MessageKind};

/// How many patients `patients` lists
const RECENT_PATIENT_LIMIT: usize = 5;

const WELCOME: &str = "🏥 Welcome to CARE WhatsApp Bot!

I can help you access your medical information and hospital services.

Please choose your role:
• Type 'patient' - For patients to view records
• Type 'staff' - For hospital staff
• Type 'help' - For more information

What are you?";

const CHOOSE_HINT: &str = "Please type 'patient' for patient access, 'staff' for hospital staff access, or 'help' for more information.";

const PATIENT_PROMPT: &str = "👤 Patient Access

To access your medical records, I need to verify your identity.

Please provide your Patient ID or the phone number registered with the hospital.

Format: Patient ID (e.g., P123456) or Phone (e.g., +919876543210)";

const STAFF_PROMPT: &str = "👨‍⚕️ Hospital Staff Access

Please provide your staff credentials to continue.

Format: StaffID:Password (e.g., STAFF123:password123)

Your credentials will be verified with the CARE system.";

const ABOUT: &str = "ℹ️ CARE WhatsApp Bot Help

🏥 *What is CARE?*
CARE is a centralized patient management system that helps hospitals manage patient records, appointments, and medical information.

👤 *For Patients:*
• View your medical records
• Check current medications
• See procedure history
• View upcoming appointments

👨‍⚕️ *For Hospital Staff:*
• Access patient information
• Send notifications to patients
• Quick patient lookups

🔒 *Privacy & Security:*
Your data is protected and only authorized information is shared based on your role.

Type 'patient' or 'staff' to get started!";

const PATIENT_MENU: &str = "📋 *Available Commands:*
• 'records' - View your medical records
• 'medicines' - Check current medications
• 'procedures' - View procedure history
• 'appointments' - See upcoming appointments
• 'help' - Show this menu again
• 'logout' - End session";

const STAFF_MENU: &str = "🏥 *Staff Commands:*
• 'search [query]' - Find patients by name, ID or phone
• 'notify [patient_id] [message]' - Send notification
• 'patients' - List recent patients
• 'help' - Show this menu
• 'logout' - End session

Example: search P123456";

const PATIENT_HELP: &str = "📋 *Patient Commands:*
• 'records' - View your medical records
• 'medicines' - Check medications
• 'procedures' - View procedures
• 'appointments' - View appointments
• 'logout' - End session";

const STAFF_HELP: &str = "👨‍⚕️ *Staff Commands:*
• 'search [query]' - Find patient
• 'notify [patient_id] [message]' - Send notification
• 'patients' - List recent patients
• 'logout' - End session";

const INVALID_PATIENT_ID: &str = "Invalid Patient ID or phone number. Please provide a valid Patient ID (e.g., P123456) or registered phone number.";
const PATIENT_AUTH_FAILED: &str = "❌ Authentication failed. Please check your Patient ID or phone number and try again.";
const INVALID_STAFF_FORMAT: &str = "Invalid staff credentials. Please use format: StaffID:Password (e.g., STAFF123:password123)";
const INVALID_STAFF_CREDENTIALS: &str = "Invalid credentials. Please check your StaffID and Password.";
const STAFF_AUTH_FAILED: &str = "❌ Authentication failed. Please check your Staff ID and Password and try again.";
const AUTH_UNAVAILABLE: &str = "Sorry, we couldn't authenticate you at this time. Please try again later.";

const LOGGED_OUT: &str = "🔒 You have been logged out. Type 'patient' or 'staff' to login again.";
const SESSION_EXPIRED: &str = "Your session has expired. Please type 'logout' and authenticate again.";
const SESSION_UNRECOGNIZED: &str = "Your session is not recognized. Type 'logout' to restart.";
const LOGIN_AGAIN: &str = "🔒 Your CARE session has expired and you have been logged out. Type 'patient' or 'staff' to login again.";
const UNKNOWN_COMMAND: &str = "Command not recognized. Type 'help' to see available options.";
const SEARCH_USAGE: &str = "Please provide a search term. Use: search [patient name, ID or phone]";
const NOTIFY_USAGE: &str = "Invalid notify format. Use: notify [patient_id] [message]";
const UNRECOGNIZED_SELECTION: &str = "Unrecognized selection. Please try again or type 'help' for assistance.";
const UNSUPPORTED: &str = "I can only process text and interactive messages at the moment.";
const REQUEST_FAILED: &str = "Sorry, I encountered an error processing your request. Please try again later.";
const INTERNAL_ERROR: &str = "Sorry, I encountered an error. Please try again or type 'help' for assistance.";

/// Reply to send back to the sender
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Buttons { body: String, buttons: Vec<Button> },
}

impl Reply {
    pub fn text(body: impl Into<String>) -> Self {
        Self::Text(body.into())
    }

    /// Text shown to the user (what gets logged)
    pub fn body(&self) -> &str {
        match self {
            Self::Text(body) | Self::Buttons { body, .. } => body,
        }
    }
}

/// Request against the CARE API on behalf of an authenticated user
#[derive(Debug, Clone, Copy)]
enum Query<'a> {
    Records,
    Medications,
    Procedures,
    Appointments,
    Search(&'a str),
    Notify { patient_id: &'a str, message: &'a str },
    RecentPatients,
}

struct Credentials {
    user_id: String,
    care_token: String,
}

/// Conversation engine
#[derive(Clone)]
pub struct BotEngine {
    sessions: SessionManager,
    care: CareClient,
    tokens: TokenManager,
}

impl BotEngine {
    pub fn new(sessions: SessionManager, care: CareClient, tokens: TokenManager) -> Self {
        Self {
            sessions,
            care,
            tokens,
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Process one inbound message; `None` means nothing to send
    pub async fn handle(&self, from: &str, message: &InboundMessage) -> Option<Reply> {
        let reply = match self.process(from, message).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("Error processing message from {}: {}", from, e);
                Some(Reply::text(INTERNAL_ERROR))
            }
        };

        if let Some(reply) = &reply {
            self.sessions
                .log_message(from, reply.body(), MessageDirection::Outgoing)
                .await;
        }
        if let Err(e) = self.sessions.touch(from).await {
            warn!("Failed to touch session for {}: {}", from, e);
        }

        reply
    }

    async fn process(&self, from: &str, message: &InboundMessage) -> Result<Option<Reply>> {
        let session = self.sessions.get_or_create(from).await?;
        let raw = serde_json::to_string(message)?;
        self.sessions
            .log_message(from, &raw, MessageDirection::Incoming)
            .await;

        let reply = match message.kind() {
            MessageKind::Text(body) | MessageKind::QuickReplyButton(body) => {
                if body.trim().is_empty() {
                    debug!("Ignoring empty message from {}", from);
                    return Ok(None);
                }
                self.handle_text(from, &session, &body).await?
            }
            MessageKind::ButtonReply(id) => self.handle_button(from, &id).await?,
            MessageKind::ListReply(id) => self.handle_list(from, &session, &id).await?,
            MessageKind::Unsupported(kind) => {
                debug!("Unsupported message type from {}: {}", from, kind);
                Reply::text(UNSUPPORTED)
            }
        };
        Ok(Some(reply))
    }

    async fn handle_text(&self, from: &str, session: &UserSession, text: &str) -> Result<Reply> {
        let text = text.trim();
        debug!("Processing '{}' from {} in state {}", text, from, session.state);

        match global_command(text) {
            Some(Command::Logout) => return self.logout(from).await,
            Some(Command::Restart) => {
                self.sessions.clear(from).await?;
                return self.welcome(from).await;
            }
            Some(Command::Help) => return Ok(Reply::text(help_for(session))),
            _ => {}
        }

        match session.state {
            ConversationState::New => self.welcome(from).await,
            ConversationState::ChoosingUserType => self.select_user_type(from, text).await,
            ConversationState::PatientAuth => self.authenticate_patient(from, text).await,
            ConversationState::StaffAuth => self.authenticate_staff(from, text).await,
            ConversationState::PatientMenu | ConversationState::StaffMenu => {
                match session.user_type {
                    UserType::Patient => self.patient_command(from, session, text).await,
                    UserType::Staff => self.staff_command(from, session, text).await,
                    UserType::Unknown => Ok(Reply::text(SESSION_UNRECOGNIZED)),
                }
            }
        }
    }

    async fn handle_button(&self, from: &str, id: &str) -> Result<Reply> {
        match strip_button_prefix(id) {
            "patient_access" => self.select_user_type(from, "patient").await,
            "staff_access" => self.select_user_type(from, "staff").await,
            "help_info" => self.select_user_type(from, "help").await,
            other => {
                debug!("Unknown button '{}' from {}", other, from);
                Ok(Reply::text(UNRECOGNIZED_SELECTION))
            }
        }
    }

    async fn handle_list(&self, from: &str, session: &UserSession, id: &str) -> Result<Reply> {
        let query = match id {
            "records" | "view_records" | "patient_records" => Query::Records,
            "medicines" | "medications" | "view_medicines" | "patient_medicines" => {
                Query::Medications
            }
            "procedures" | "view_procedures" | "patient_procedures" => Query::Procedures,
            "appointments" | "view_appointments" | "patient_appointments" => Query::Appointments,
            "help" | "view_help" | "help_info" => return Ok(Reply::text(help_for(session))),
            other => {
                debug!("Unknown list selection '{}' from {}", other, from);
                return Ok(Reply::text(UNRECOGNIZED_SELECTION));
            }
        };

        if !session.is_authenticated {
            return Ok(Reply::text(SESSION_EXPIRED));
        }
        if session.user_type != UserType::Patient {
            return Ok(Reply::text(UNRECOGNIZED_SELECTION));
        }
        self.run(from, session, query).await
    }

    async fn welcome(&self, from: &str) -> Result<Reply> {
        self.sessions
            .update_state(from, ConversationState::ChoosingUserType, None)
            .await?;
        Ok(Reply::Buttons {
            body: WELCOME.to_string(),
            buttons: vec![
                Button::new("patient_access", "Patient"),
                Button::new("staff_access", "Staff"),
                Button::new("help_info", "Help"),
            ],
        })
    }

    async fn logout(&self, from: &str) -> Result<Reply> {
        self.sessions.clear(from).await?;
        info!("User {} logged out", from);
        Ok(Reply::text(LOGGED_OUT))
    }

    async fn select_user_type(&self, from: &str, text: &str) -> Result<Reply> {
        let lower = text.trim().to_lowercase();

        if lower.contains("patient") {
            self.sessions
                .update_state(from, ConversationState::PatientAuth, None)
                .await?;
            Ok(Reply::text(PATIENT_PROMPT))
        } else if lower.contains("staff") {
            self.sessions
                .update_state(from, ConversationState::StaffAuth, None)
                .await?;
            Ok(Reply::text(STAFF_PROMPT))
        } else if lower.contains("help") {
            Ok(Reply::text(ABOUT))
        } else {
            Ok(Reply::text(CHOOSE_HINT))
        }
    }

    async fn authenticate_patient(&self, from: &str, text: &str) -> Result<Reply> {
        let patient_id = text.trim();
        if patient_id.chars().count() < 5 || !is_valid_patient_id(patient_id) {
            return Ok(Reply::text(INVALID_PATIENT_ID));
        }

        let patient = match self.care.authenticate_patient(patient_id).await {
            Ok(patient) => patient,
            Err(e) if e.is_auth_rejection() => {
                warn!("Failed patient authentication attempt from {}: {}", from, e);
                return Ok(Reply::text(PATIENT_AUTH_FAILED));
            }
            Err(e) => {
                error!("Error authenticating patient {}: {}", from, e);
                return Ok(Reply::text(AUTH_UNAVAILABLE));
            }
        };

        let bot_token = self.tokens.generate(&patient.patient_id, UserType::Patient)?;
        self.sessions
            .authenticate(
                from,
                UserType::Patient,
                &patient.patient_id,
                SessionTokens {
                    bot_token,
                    care_token: patient.tokens.access,
                    care_refresh_token: patient.tokens.refresh,
                },
            )
            .await?;

        let mut data = Map::new();
        data.insert("patient_name".to_string(), Value::String(patient.name.clone()));
        self.sessions
            .update_state(from, ConversationState::PatientMenu, Some(data))
            .await?;

        info!("Patient authenticated successfully: {} with ID {}", from, patient.patient_id);
        Ok(Reply::text(format!(
            "✅ Authentication Successful!\n\nWelcome {} to your CARE patient portal. Here's what you can do:\n\n{}\n\nWhat would you like to do?",
            patient.name, PATIENT_MENU
        )))
    }

    async fn authenticate_staff(&self, from: &str, text: &str) -> Result<Reply> {
        let text = text.trim();
        if !text.contains(':') || text.chars().count() < 8 {
            return Ok(Reply::text(INVALID_STAFF_FORMAT));
        }
        let Some((staff_id, password)) = text.split_once(':') else {
            return Ok(Reply::text(INVALID_STAFF_FORMAT));
        };
        if staff_id.is_empty() || password.chars().count() < 6 {
            return Ok(Reply::text(INVALID_STAFF_CREDENTIALS));
        }

        let staff = match self.care.authenticate_staff(staff_id, password).await {
            Ok(staff) => staff,
            Err(e) if e.is_auth_rejection() => {
                warn!("Failed staff authentication attempt from {} as {}: {}", from, staff_id, e);
                return Ok(Reply::text(STAFF_AUTH_FAILED));
            }
            Err(e) => {
                error!("Error authenticating staff {}: {}", from, e);
                return Ok(Reply::text(AUTH_UNAVAILABLE));
            }
        };

        let role = if staff.role.is_empty() {
            "Staff".to_string()
        } else {
            staff.role.clone()
        };

        let bot_token = self.tokens.generate(&staff.staff_id, UserType::Staff)?;
        self.sessions
            .authenticate(
                from,
                UserType::Staff,
                &staff.staff_id,
                SessionTokens {
                    bot_token,
                    care_token: staff.tokens.access,
                    care_refresh_token: staff.tokens.refresh,
                },
            )
            .await?;

        let mut data = Map::new();
        data.insert("staff_name".to_string(), Value::String(staff.name.clone()));
        data.insert("staff_role".to_string(), Value::String(role.clone()));
        self.sessions
            .update_state(from, ConversationState::StaffMenu, Some(data))
            .await?;

        info!("Staff authenticated successfully: {} with ID {}", from, staff.staff_id);
        Ok(Reply::text(format!(
            "✅ Staff Authentication Successful!\n\nWelcome {} ({}) to CARE Staff Portal. Available commands:\n\n{}\n\nWhat would you like to do?",
            staff.name, role, STAFF_MENU
        )))
    }

    async fn patient_command(&self, from: &str, session: &UserSession, text: &str) -> Result<Reply> {
        let query = match single_word_command(text) {
            Some(Command::Records) => Query::Records,
            Some(Command::Medicines) => Query::Medications,
            Some(Command::Procedures) => Query::Procedures,
            Some(Command::Appointments) => Query::Appointments,
            Some(Command::Help | Command::Menu | Command::Back) => {
                return Ok(Reply::text(PATIENT_HELP));
            }
            _ => return Ok(Reply::text(UNKNOWN_COMMAND)),
        };
        self.run(from, session, query).await
    }

    async fn staff_command(&self, from: &str, session: &UserSession, text: &str) -> Result<Reply> {
        match Command::parse(text) {
            Some(Command::Search) => {
                let query = text
                    .split_once(char::is_whitespace)
                    .map(|(_, rest)| rest.trim())
                    .unwrap_or_default();
                if query.is_empty() {
                    return Ok(Reply::text(SEARCH_USAGE));
                }
                self.run(from, session, Query::Search(query)).await
            }
            Some(Command::Notify) => {
                let mut parts = text.split_whitespace().skip(1);
                let patient_id = parts.next();
                let message = parts.collect::<Vec<_>>().join(" ");
                match patient_id {
                    Some(patient_id) if !message.is_empty() && is_valid_patient_id(patient_id) => {
                        self.run(
                            from,
                            session,
                            Query::Notify {
                                patient_id,
                                message: &message,
                            },
                        )
                        .await
                    }
                    _ => Ok(Reply::text(NOTIFY_USAGE)),
                }
            }
            _ => match single_word_command(text) {
                Some(Command::Patients) => self.run(from, session, Query::RecentPatients).await,
                Some(Command::Help | Command::Menu | Command::Back) => Ok(Reply::text(STAFF_HELP)),
                _ => Ok(Reply::text(UNKNOWN_COMMAND)),
            },
        }
    }

    /// Run a CARE query for an authenticated user
    ///
    /// A rejected CARE token is refreshed once; if that fails too the
    /// session is cleared.
    async fn run(&self, from: &str, session: &UserSession, query: Query<'_>) -> Result<Reply> {
        let Some(credentials) = self.credentials(from, session).await? else {
            return Ok(Reply::text(SESSION_EXPIRED));
        };

        let result = match self
            .query_care(query, &credentials.user_id, &credentials.care_token)
            .await
        {
            Err(CareError::Unauthorized) => {
                info!("CARE token rejected for {}, refreshing", from);
                match self.refresh_care_token(from, session).await {
                    Some(token) => self.query_care(query, &credentials.user_id, &token).await,
                    None => Err(CareError::Unauthorized),
                }
            }
            other => other,
        };

        match result {
            Ok(text) => Ok(Reply::text(text)),
            Err(CareError::Unauthorized) => {
                warn!("CARE session could not be renewed for {}, logging out", from);
                self.sessions.clear(from).await?;
                Ok(Reply::text(LOGIN_AGAIN))
            }
            Err(e) => {
                error!("CARE request {:?} failed for {}: {}", query, from, e);
                Ok(Reply::text(REQUEST_FAILED))
            }
        }
    }

    /// User id and CARE token, if the session is authenticated and the bot
    /// token is still valid; the bot token is re-issued on success
    async fn credentials(&self, from: &str, session: &UserSession) -> Result<Option<Credentials>> {
        let (Some(user_id), Some(care_token), Some(bot_token)) = (
            session.data_str("user_id"),
            session.care_token.as_deref(),
            session.auth_token.as_deref(),
        ) else {
            debug!("Session for {} is missing credentials", from);
            return Ok(None);
        };

        let refreshed = match self.tokens.refresh(bot_token) {
            Ok(token) => token,
            Err(e) => {
                info!("Bot token no longer valid for {}: {}", from, e);
                return Ok(None);
            }
        };
        self.sessions.update_bot_token(from, &refreshed).await?;

        Ok(Some(Credentials {
            user_id: user_id.to_string(),
            care_token: care_token.to_string(),
        }))
    }

    async fn refresh_care_token(&self, from: &str, session: &UserSession) -> Option<String> {
        let refresh = session.care_refresh_token.as_deref()?;

        match self.care.refresh_token(refresh).await {
            Ok(tokens) => {
                if let Err(e) = self
                    .sessions
                    .update_tokens(from, &tokens.access, tokens.refresh.as_deref())
                    .await
                {
                    error!("Failed to store refreshed CARE token for {}: {}", from, e);
                    return None;
                }
                Some(tokens.access)
            }
            Err(e) => {
                warn!("Failed to refresh CARE token for {}: {}", from, e);
                None
            }
        }
    }

    async fn query_care(
        &self,
        query: Query<'_>,
        user_id: &str,
        token: &str,
    ) -> care_client::Result<String> {
        match query {
            Query::Records => self
                .care
                .patient_records(user_id, token)
                .await
                .map(|records| format::records(&records)),
            Query::Medications => self
                .care
                .patient_medications(user_id, token)
                .await
                .map(|meds| format::medications(&meds)),
            Query::Procedures => self
                .care
                .patient_procedures(user_id, token)
                .await
                .map(|procedures| format::procedures(&procedures)),
            Query::Appointments => self
                .care
                .patient_appointments(user_id, token)
                .await
                .map(|appointments| format::appointments(&appointments)),
            Query::Search(search) => self
                .care
                .search_patients(search, token)
                .await
                .map(|patients| format::search_results(search, &patients)),
            Query::Notify {
                patient_id,
                message,
            } => self
                .care
                .notify_patient(patient_id, message, token)
                .await
                .map(|receipt| format::notification_sent(patient_id, message, &receipt)),
            Query::RecentPatients => self
                .care
                .recent_patients(token, RECENT_PATIENT_LIMIT)
                .await
                .map(|patients| format::recent_patients(&patients)),
        }
    }
}

/// `help`, `logout` or `restart` as the whole message
fn global_command(text: &str) -> Option<Command> {
    single_word_command(text)
        .filter(|c| matches!(c, Command::Help | Command::Logout | Command::Restart))
}

fn single_word_command(text: &str) -> Option<Command> {
    if text.split_whitespace().count() == 1 {
        Command::parse(text)
    } else {
        None
    }
}

fn help_for(session: &UserSession) -> &'static str {
    if !session.is_authenticated {
        return ABOUT;
    }
    match session.user_type {
        UserType::Patient => PATIENT_HELP,
        UserType::Staff => STAFF_HELP,
        UserType::Unknown => SESSION_UNRECOGNIZED,
    }
}

/// Reply buttons come back as `btn_{index}_{id}`
fn strip_button_prefix(id: &str) -> &str {
    id.strip_prefix("btn_")
        .and_then(|rest| rest.split_once('_'))
        .filter(|(index, _)| !index.is_empty() && index.chars().all(|c| c.is_ascii_digit()))
        .map(|(_, id)| id)
        .unwrap_or(id)
}
