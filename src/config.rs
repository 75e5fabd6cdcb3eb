//! Configuration types.

use secrecy::SecretString;

use crate::error::ConfigError;

/// Service configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct AlertsConfig {
    /// Telegram Bot API token.
    pub bot_token: SecretString,
    /// Username or `@id` of the channel carrying load postings.
    pub load_channel: String,
    /// Path to the local rule database.
    pub db_path: String,
    /// Long-poll timeout for getUpdates, in seconds.
    pub poll_timeout_secs: u64,
}

impl AlertsConfig {
    /// Read configuration from environment variables.
    ///
    /// `LOAD_ALERTS_BOT_TOKEN` and `LOAD_ALERTS_CHANNEL` are required;
    /// everything else has a default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let bot_token = std::env::var("LOAD_ALERTS_BOT_TOKEN")
            .map_err(|_| ConfigError::MissingEnvVar("LOAD_ALERTS_BOT_TOKEN".into()))?;
        let load_channel = std::env::var("LOAD_ALERTS_CHANNEL")
            .map_err(|_| ConfigError::MissingEnvVar("LOAD_ALERTS_CHANNEL".into()))?;

        let db_path = std::env::var("LOAD_ALERTS_DB_PATH")
            .unwrap_or_else(|_| "./data/load-alerts.db".to_string());

        let poll_timeout_secs = match std::env::var("LOAD_ALERTS_POLL_TIMEOUT_SECS") {
            Ok(raw) => raw.parse().map_err(|e| ConfigError::InvalidValue {
                key: "LOAD_ALERTS_POLL_TIMEOUT_SECS".into(),
                message: format!("{e}"),
            })?,
            Err(_) => 30,
        };

        Ok(Self {
            bot_token: SecretString::from(bot_token),
            load_channel,
            db_path,
            poll_timeout_secs,
        })
    }
}
