//! Configuration types, read from the environment at startup.

use std::path::PathBuf;

use secrecy::SecretString;

use crate::autoreply::rules::{CaseSensitivity, DelayPolicy, EvaluatorConfig};
use crate::error::ConfigError;

/// Default Graph API host. Overridable so tests can point at a local fake.
pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.facebook.com";

pub const DEFAULT_WHATSAPP_API_VERSION: &str = "v21.0";

/// Service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub db_path: PathBuf,
    /// E-mails granted admin rights by the API key authorizer.
    pub admin_emails: Vec<String>,
    /// Account ensured at startup when both halves are set.
    pub bootstrap_email: Option<String>,
    pub bootstrap_api_key: Option<SecretString>,
    pub evaluator: EvaluatorConfig,
    /// `None` means outbound sending is disabled.
    pub whatsapp: Option<WhatsAppConfig>,
    /// Token Meta echoes during webhook verification.
    pub verify_token: Option<SecretString>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            db_path: PathBuf::from("./data/bumby.db"),
            admin_emails: Vec::new(),
            bootstrap_email: None,
            bootstrap_api_key: None,
            evaluator: EvaluatorConfig::default(),
            whatsapp: None,
            verify_token: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. `from_env` is this over `std::env::var`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let port = match get("BUMBY_PORT") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "BUMBY_PORT".into(),
                message: format!("'{raw}' is not a valid port"),
            })?,
            None => defaults.port,
        };

        let db_path = get("BUMBY_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let admin_emails: Vec<String> = get("BUMBY_ADMIN_EMAILS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        let case_sensitivity = match get("BUMBY_MATCH_CASE_INSENSITIVE").as_deref() {
            None => CaseSensitivity::Sensitive,
            Some(raw) => match raw.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => CaseSensitivity::Insensitive,
                "0" | "false" | "no" | "off" => CaseSensitivity::Sensitive,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "BUMBY_MATCH_CASE_INSENSITIVE".into(),
                        message: format!("'{raw}' is not a boolean"),
                    });
                }
            },
        };

        let delay_policy = match get("BUMBY_DELAY_POLICY").as_deref() {
            None => DelayPolicy::Clamp,
            Some(raw) => match raw.to_lowercase().as_str() {
                "clamp" => DelayPolicy::Clamp,
                "reject" => DelayPolicy::Reject,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "BUMBY_DELAY_POLICY".into(),
                        message: format!("expected 'clamp' or 'reject', got '{raw}'"),
                    });
                }
            },
        };

        Ok(Self {
            port,
            db_path,
            admin_emails,
            bootstrap_email: get("BUMBY_BOOTSTRAP_EMAIL"),
            bootstrap_api_key: get("BUMBY_BOOTSTRAP_API_KEY").map(SecretString::from),
            evaluator: EvaluatorConfig {
                case_sensitivity,
                delay_policy,
            },
            whatsapp: WhatsAppConfig::from_lookup(&get),
            verify_token: get("WHATSAPP_VERIFY_TOKEN").map(SecretString::from),
        })
    }
}

/// WhatsApp Cloud API credentials.
#[derive(Debug, Clone)]
pub struct WhatsAppConfig {
    pub phone_number_id: String,
    pub access_token: SecretString,
    pub api_version: String,
    pub graph_base_url: String,
}

impl WhatsAppConfig {
    pub fn new(phone_number_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            phone_number_id: phone_number_id.into(),
            access_token: SecretString::from(access_token.into()),
            api_version: DEFAULT_WHATSAPP_API_VERSION.to_string(),
            graph_base_url: DEFAULT_GRAPH_BASE_URL.to_string(),
        }
    }

    /// `None` unless both the phone number id and the access token are set.
    fn from_lookup(get: &dyn Fn(&str) -> Option<String>) -> Option<Self> {
        let phone_number_id = get("WHATSAPP_PHONE_NUMBER_ID")?;
        let access_token = get("WHATSAPP_ACCESS_TOKEN")?;
        let mut config = Self::new(phone_number_id, access_token);
        if let Some(version) = get("WHATSAPP_API_VERSION") {
            config.api_version = version;
        }
        Some(config)
    }

    /// `https://graph.facebook.com/v21.0`
    pub fn base_url(&self) -> String {
        format!(
            "{}/{}",
            self.graph_base_url.trim_end_matches('/'),
            self.api_version
        )
    }
}
