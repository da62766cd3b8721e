//! Application configuration

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Phrases a bot reply uses when it cannot answer
pub const DEFAULT_ESCALATION_PHRASES: &[&str] = &[
    "saya belum bisa kasih jawaban",
    "tidak bisa menjawab",
    "akan saya arahkan ke Agent Manusia",
    "tidak dapat menjawab pertanyaan",
];

pub const DEFAULT_WELCOME_MESSAGE: &str = "Hai saya MajooCare, Ada yang bisa di bantu ?";

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,
    pub log_format: LogFormat,

    // Database (in-memory store when unset)
    pub database_url: Option<String>,
    pub database_max_connections: u32,

    // Bot bridge
    pub bot_api_url: Option<String>,
    pub bot_branch_id: String,
    pub bot_request_timeout_ms: u64,
    pub escalation_phrases: Vec<String>,
    pub welcome_message: String,

    // Telegram bridge
    pub telegram_webhook_url: Option<String>,

    // Ticketing bridge
    pub ticketing: TicketingConfig,

    // Real-time delivery
    pub delivery_cache_max_age_secs: u64,
    pub ws_heartbeat_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketingConfig {
    pub api_url: String,
    /// Personal API token; ticket creation is disabled without one
    pub api_token: Option<String>,
    pub list_id: Option<String>,
    pub assignees: Vec<u64>,
    pub task_url_base: String,
}

impl TicketingConfig {
    pub fn is_enabled(&self) -> bool {
        self.api_token.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let ticketing = TicketingConfig {
            api_url: env::var("TICKETING_API_URL")
                .unwrap_or_else(|_| "https://api.clickup.com/api/v2".to_string()),
            api_token: non_empty("TICKETING_API_TOKEN"),
            list_id: non_empty("TICKETING_LIST_ID"),
            assignees: match non_empty("TICKETING_ASSIGNEES") {
                Some(raw) => raw
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| {
                        s.parse()
                            .map_err(|_| ConfigError::Invalid("TICKETING_ASSIGNEES", s.to_string()))
                    })
                    .collect::<Result<_, _>>()?,
                None => Vec::new(),
            },
            task_url_base: env::var("TICKETING_TASK_URL_BASE")
                .unwrap_or_else(|_| "https://app.clickup.com/t".to_string()),
        };

        if ticketing.api_token.is_some() && ticketing.list_id.is_none() {
            return Err(ConfigError::Missing("TICKETING_LIST_ID"));
        }

        let config = Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:5000".to_string()),
            log_format: match env::var("LOG_FORMAT").as_deref() {
                Ok("json") => LogFormat::Json,
                Ok("text") | Err(_) => LogFormat::Text,
                Ok(other) => return Err(ConfigError::Invalid("LOG_FORMAT", other.to_string())),
            },

            // Database
            database_url: non_empty("DATABASE_URL"),
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 5)?,

            // Bot bridge
            bot_api_url: non_empty("BOT_API_URL"),
            bot_branch_id: env::var("BOT_BRANCH_ID").unwrap_or_else(|_| "main".to_string()),
            bot_request_timeout_ms: parse_or("BOT_REQUEST_TIMEOUT_MS", 15_000)?,
            escalation_phrases: match non_empty("ESCALATION_PHRASES") {
                Some(raw) => raw
                    .split('|')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect(),
                None => DEFAULT_ESCALATION_PHRASES
                    .iter()
                    .map(|p| p.to_string())
                    .collect(),
            },
            welcome_message: env::var("WELCOME_MESSAGE")
                .unwrap_or_else(|_| DEFAULT_WELCOME_MESSAGE.to_string()),

            // Telegram bridge
            telegram_webhook_url: non_empty("TELEGRAM_WEBHOOK_URL"),

            ticketing,

            // Real-time delivery
            delivery_cache_max_age_secs: parse_positive("DELIVERY_CACHE_MAX_AGE_SECS", 600)?,
            ws_heartbeat_interval_secs: parse_positive("WS_HEARTBEAT_INTERVAL_SECS", 30)?,
        };

        Ok(config)
    }

    pub fn bot_request_timeout(&self) -> Duration {
        Duration::from_millis(self.bot_request_timeout_ms)
    }

    pub fn delivery_cache_max_age(&self) -> Duration {
        Duration::from_secs(self.delivery_cache_max_age_secs)
    }

    pub fn ws_heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.ws_heartbeat_interval_secs)
    }
}

impl Default for Config {
    /// Defaults for every setting with no external collaborators configured
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:5000".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            database_max_connections: 5,
            bot_api_url: None,
            bot_branch_id: "main".to_string(),
            bot_request_timeout_ms: 15_000,
            escalation_phrases: DEFAULT_ESCALATION_PHRASES
                .iter()
                .map(|p| p.to_string())
                .collect(),
            welcome_message: DEFAULT_WELCOME_MESSAGE.to_string(),
            telegram_webhook_url: None,
            ticketing: TicketingConfig {
                api_url: "https://api.clickup.com/api/v2".to_string(),
                api_token: None,
                list_id: None,
                assignees: Vec::new(),
                task_url_base: "https://app.clickup.com/t".to_string(),
            },
            delivery_cache_max_age_secs: 600,
            ws_heartbeat_interval_secs: 30,
        }
    }
}

fn non_empty(key: &'static str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match non_empty(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(key, raw)),
        None => Ok(default),
    }
}

fn parse_positive(key: &'static str, default: u64) -> Result<u64, ConfigError> {
    let value = parse_or(key, default)?;
    if value == 0 {
        return Err(ConfigError::Invalid(key, "0".to_string()));
    }
    Ok(value)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}
