//! Configuration management
//!
//! Settings are resolved in this order:
//! 1. Environment variables (a `.env` file is loaded by `Config::load`)
//! 2. `care-bot.toml` configuration file
//! 3. Defaults
//!
//! `${VAR_NAME}` inside the TOML file is replaced by the environment value.
//! Empty values count as unset.

use chrono::TimeDelta;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::constants::MAX_DURATION_MINUTES;
use crate::constants::whatsapp::{DEFAULT_API_VERSION, DEFAULT_BASE_URL};
use crate::{Error, Result};

/// Required variables, in the order they are reported when missing
const REQUIRED_VARS: &[&str] = &[
    "WHATSAPP_ACCESS_TOKEN",
    "WHATSAPP_PHONE_NUMBER_ID",
    "WHATSAPP_WEBHOOK_VERIFY_TOKEN",
    "CARE_API_BASE_URL",
    "CARE_API_KEY",
    "SECRET_KEY",
];

/// WhatsApp Business (Cloud API) settings
#[derive(Debug, Clone)]
pub struct WhatsAppConfig {
    pub access_token: String,
    pub phone_number_id: String,
    /// Token Meta echoes back during webhook verification
    pub verify_token: String,
    /// App secret for `X-Hub-Signature-256`; unchecked when absent
    pub app_secret: Option<String>,
    pub api_version: String,
    pub base_url: String,
}

/// CARE REST API settings
#[derive(Debug, Clone)]
pub struct CareApiConfig {
    pub base_url: String,
    pub api_key: String,
}

/// HTTP server settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Bearer key for the admin routes; open when absent
    pub admin_api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            admin_api_key: None,
        }
    }
}

/// Session persistence and lifetime settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub db_path: String,
    pub timeout_minutes: i64,
    pub token_expiry_minutes: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            timeout_minutes: default_timeout_minutes(),
            token_expiry_minutes: default_token_expiry_minutes(),
        }
    }
}

/// Main configuration for the bot
#[derive(Debug, Clone)]
pub struct Config {
    pub whatsapp: WhatsAppConfig,
    pub care_api: CareApiConfig,
    pub server: ServerConfig,
    pub session: SessionConfig,
    /// Signing secret for bot session tokens
    pub secret_key: String,
}

fn default_port() -> u16 {
    8000
}

fn default_db_path() -> String {
    "data/care-bot.db".to_string()
}

fn default_timeout_minutes() -> i64 {
    30
}

fn default_token_expiry_minutes() -> i64 {
    1440
}

impl Config {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from the default location
    ///
    /// Reads `.env` into the environment first, then uses `./care-bot.toml`
    /// when it exists and the environment otherwise.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        if Path::new("care-bot.toml").exists() {
            return Self::from_toml_file("care-bot.toml");
        }
        Self::from_env()
    }

    /// Load configuration from a TOML file, with environment overrides
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_toml_str(&content, |key| std::env::var(key).ok())
    }

    /// Parse TOML content; `env` is consulted for `${VAR}` expansion and overrides
    pub fn from_toml_str<F>(content: &str, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let expanded = expand_env_vars(content, &env);
        let toml: TomlConfig = toml::from_str(&expanded)
            .map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))?;
        let file_values = toml.into_env_map();

        Self::from_lookup(|key| {
            non_empty(env(key)).or_else(|| file_values.get(key).cloned())
        })
    }

    /// Build configuration from an arbitrary variable lookup
    ///
    /// Every missing required variable is reported in a single error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| non_empty(lookup(key));

        let missing: Vec<String> = REQUIRED_VARS
            .iter()
            .filter(|key| get(key).is_none())
            .map(|key| key.to_string())
            .collect();
        if !missing.is_empty() {
            tracing::error!("Missing required environment variables: {}", missing.join(", "));
            return Err(Error::MissingEnv(missing));
        }

        let required = |key: &str| get(key).unwrap_or_default();

        let whatsapp = WhatsAppConfig {
            access_token: required("WHATSAPP_ACCESS_TOKEN"),
            phone_number_id: required("WHATSAPP_PHONE_NUMBER_ID"),
            verify_token: required("WHATSAPP_WEBHOOK_VERIFY_TOKEN"),
            app_secret: get("WHATSAPP_APP_SECRET"),
            api_version: get("WHATSAPP_API_VERSION")
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            base_url: get("WHATSAPP_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        };

        let care_api = CareApiConfig {
            base_url: required("CARE_API_BASE_URL"),
            api_key: required("CARE_API_KEY"),
        };

        let server = ServerConfig {
            port: parse_or(get("BOT_PORT"), "BOT_PORT", default_port())?,
            admin_api_key: get("ADMIN_API_KEY"),
        };

        let session = SessionConfig {
            db_path: get("DB_PATH").unwrap_or_else(default_db_path),
            timeout_minutes: parse_or(
                get("SESSION_TIMEOUT_MINUTES"),
                "SESSION_TIMEOUT_MINUTES",
                default_timeout_minutes(),
            )?,
            token_expiry_minutes: parse_or(
                get("TOKEN_EXPIRY_MINUTES"),
                "TOKEN_EXPIRY_MINUTES",
                default_token_expiry_minutes(),
            )?,
        };

        duration_minutes("SESSION_TIMEOUT_MINUTES", session.timeout_minutes)?;
        duration_minutes("TOKEN_EXPIRY_MINUTES", session.token_expiry_minutes)?;

        Ok(Config {
            whatsapp,
            care_api,
            server,
            session,
            secret_key: required("SECRET_KEY"),
        })
    }
}

/// Minute count in `1..=MAX_DURATION_MINUTES` as a duration
pub fn duration_minutes(key: &str, minutes: i64) -> Result<TimeDelta> {
    if !(1..=MAX_DURATION_MINUTES).contains(&minutes) {
        return Err(Error::Config(format!(
            "{} must be between 1 and {} minutes, got {}",
            key, MAX_DURATION_MINUTES, minutes
        )));
    }
    TimeDelta::try_minutes(minutes)
        .ok_or_else(|| Error::Config(format!("{} is out of range: {}", key, minutes)))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, key: &str, default: T) -> Result<T> {
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{} has an invalid value: {}", key, raw))),
        None => Ok(default),
    }
}

/// Replace `${VAR_NAME}` with the looked-up value (empty when unset)
fn expand_env_vars<F>(value: &str, env: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut result = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();

            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }

            if let Some(env_value) = env(&var_name) {
                result.push_str(&env_value);
            }
        } else {
            result.push(c);
        }
    }

    result
}

// ============================================================================
// TOML file layout
// ============================================================================

#[derive(Debug, Deserialize, Default)]
struct TomlConfig {
    secret_key: Option<String>,
    whatsapp: Option<TomlWhatsAppConfig>,
    care_api: Option<TomlCareApiConfig>,
    server: Option<TomlServerConfig>,
    session: Option<TomlSessionConfig>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlWhatsAppConfig {
    access_token: Option<String>,
    phone_number_id: Option<String>,
    verify_token: Option<String>,
    app_secret: Option<String>,
    api_version: Option<String>,
    base_url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlCareApiConfig {
    base_url: Option<String>,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlServerConfig {
    port: Option<u16>,
    admin_api_key: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlSessionConfig {
    db_path: Option<String>,
    timeout_minutes: Option<i64>,
    token_expiry_minutes: Option<i64>,
}

impl TomlConfig {
    /// Flatten file values under their environment variable names
    fn into_env_map(self) -> HashMap<&'static str, String> {
        let mut map = HashMap::new();
        let mut put = |key: &'static str, value: Option<String>| {
            if let Some(value) = value {
                map.insert(key, value);
            }
        };

        put("SECRET_KEY", self.secret_key);

        let whatsapp = self.whatsapp.unwrap_or_default();
        put("WHATSAPP_ACCESS_TOKEN", whatsapp.access_token);
        put("WHATSAPP_PHONE_NUMBER_ID", whatsapp.phone_number_id);
        put("WHATSAPP_WEBHOOK_VERIFY_TOKEN", whatsapp.verify_token);
        put("WHATSAPP_APP_SECRET", whatsapp.app_secret);
        put("WHATSAPP_API_VERSION", whatsapp.api_version);
        put("WHATSAPP_BASE_URL", whatsapp.base_url);

        let care_api = self.care_api.unwrap_or_default();
        put("CARE_API_BASE_URL", care_api.base_url);
        put("CARE_API_KEY", care_api.api_key);

        let server = self.server.unwrap_or_default();
        put("BOT_PORT", server.port.map(|p| p.to_string()));
        put("ADMIN_API_KEY", server.admin_api_key);

        let session = self.session.unwrap_or_default();
        put("DB_PATH", session.db_path);
        put("SESSION_TIMEOUT_MINUTES", session.timeout_minutes.map(|m| m.to_string()));
        put("TOKEN_EXPIRY_MINUTES", session.token_expiry_minutes.map(|m| m.to_string()));

        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn required_env() -> Vec<(&'static str, &'static str)> {
        vec![
            ("WHATSAPP_ACCESS_TOKEN", "wa-token"),
            ("WHATSAPP_PHONE_NUMBER_ID", "12345"),
            ("WHATSAPP_WEBHOOK_VERIFY_TOKEN", "verify-me"),
            ("CARE_API_BASE_URL", "https://care.example.org"),
            ("CARE_API_KEY", "care-key"),
            ("SECRET_KEY", "s3cret"),
        ]
    }

    #[test]
    fn test_from_lookup_applies_defaults() {
        let config = Config::from_lookup(env(&required_env())).unwrap();
        assert_eq!(config.whatsapp.api_version, "v22.0");
        assert_eq!(config.whatsapp.base_url, "https://graph.facebook.com");
        assert!(config.whatsapp.app_secret.is_none());
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.session.db_path, "data/care-bot.db");
        assert_eq!(config.session.timeout_minutes, 30);
        assert_eq!(config.session.token_expiry_minutes, 1440);
    }

    #[test]
    fn test_missing_vars_reported_together() {
        let err = Config::from_lookup(env(&[
            ("WHATSAPP_ACCESS_TOKEN", "wa-token"),
            ("CARE_API_KEY", ""),
        ]))
        .unwrap_err();

        match err {
            Error::MissingEnv(missing) => assert_eq!(
                missing,
                vec![
                    "WHATSAPP_PHONE_NUMBER_ID",
                    "WHATSAPP_WEBHOOK_VERIFY_TOKEN",
                    "CARE_API_BASE_URL",
                    "CARE_API_KEY",
                    "SECRET_KEY",
                ]
            ),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_out_of_range_minutes_rejected() {
        for (key, value) in [
            ("SESSION_TIMEOUT_MINUTES", "-5"),
            ("SESSION_TIMEOUT_MINUTES", "0"),
            ("TOKEN_EXPIRY_MINUTES", "0"),
            ("TOKEN_EXPIRY_MINUTES", "9223372036854775807"),
            ("TOKEN_EXPIRY_MINUTES", "525601"),
        ] {
            let mut vars = required_env();
            vars.push((key, value));
            let err = Config::from_lookup(env(&vars)).unwrap_err();
            assert!(
                matches!(&err, Error::Config(msg) if msg.contains(key)),
                "{} = {}: {}",
                key,
                value,
                err
            );
        }

        let mut vars = required_env();
        vars.push(("TOKEN_EXPIRY_MINUTES", "525600"));
        vars.push(("SESSION_TIMEOUT_MINUTES", "1"));
        let config = Config::from_lookup(env(&vars)).unwrap();
        assert_eq!(config.session.token_expiry_minutes, 525_600);
        assert_eq!(config.session.timeout_minutes, 1);
    }

    #[test]
    fn test_duration_minutes() {
        assert_eq!(duration_minutes("X", 30).unwrap(), TimeDelta::minutes(30));
        assert!(duration_minutes("X", -1).is_err());
        assert!(duration_minutes("X", i64::MAX).is_err());
    }

    #[test]
    fn test_invalid_port_is_config_error() {
        let mut vars = required_env();
        vars.push(("BOT_PORT", "eighty"));
        let err = Config::from_lookup(env(&vars)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_expand_env_vars() {
        let lookup = env(&[("CARE_TEST_VAR", "value")]);
        assert_eq!(expand_env_vars("a_${CARE_TEST_VAR}_b", &lookup), "a_value_b");
        assert_eq!(expand_env_vars("a_${NOPE}_b", &lookup), "a__b");
        assert_eq!(expand_env_vars("${}_rest", &lookup), "_rest");
        assert_eq!(expand_env_vars("plain $text", &lookup), "plain $text");
    }

    #[test]
    fn test_toml_with_env_override() {
        let content = r#"
secret_key = "${BOT_SECRET}"

[whatsapp]
access_token = "file-token"
phone_number_id = "999"
verify_token = "file-verify"
app_secret = "app-secret"

[care_api]
base_url = "https://care.file"
api_key = "file-key"

[server]
port = 9090

[session]
db_path = "/tmp/bot.db"
timeout_minutes = 15
"#;
        let config = Config::from_toml_str(
            content,
            env(&[("BOT_SECRET", "expanded"), ("CARE_API_KEY", "env-key")]),
        )
        .unwrap();

        assert_eq!(config.secret_key, "expanded");
        assert_eq!(config.whatsapp.access_token, "file-token");
        assert_eq!(config.whatsapp.app_secret.as_deref(), Some("app-secret"));
        assert_eq!(config.care_api.api_key, "env-key");
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.session.db_path, "/tmp/bot.db");
        assert_eq!(config.session.timeout_minutes, 15);
        assert_eq!(config.session.token_expiry_minutes, 1440);
    }

    #[test]
    fn test_toml_file_missing_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::from_toml_file(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
