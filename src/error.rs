//! Error types for Load Alerts.

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Rule error: {0}")]
    Rule(#[from] RuleError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Rule store errors.
///
/// Store unavailability is fatal to the caller of `dispatch` /
/// `enumerate_active`; the core never retries internally.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to open store: {0}")]
    Open(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Channel-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to deliver on channel {name}: {reason}")]
    DeliveryFailed { name: String, reason: String },

    #[error("Channel {name} health check failed: {reason}")]
    HealthCheckFailed { name: String, reason: String },
}

/// Rule mutation validation errors.
///
/// Rejected synchronously at the mutation boundary; the stored rule is
/// left unchanged.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("State must be exactly 2 letters (e.g. OH), got '{0}'")]
    InvalidState(String),

    #[error("City must be non-empty and start with a letter, got '{0}'")]
    InvalidCity(String),

    #[error("Expected 'City, ST' (e.g. Cincinnati, OH): {0}")]
    InvalidCityStateArg(String),

    #[error("Origin scope must be 'first2' or 'any', got '{0}'")]
    InvalidScope(String),
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
