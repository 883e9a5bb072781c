//! Error types for the notification gatekeeper

use thiserror::Error;

/// Result type alias for gatekeeper operations
pub type Result<T> = std::result::Result<T, GatekeeperError>;

#[derive(Error, Debug)]
pub enum GatekeeperError {

    // =============================
    // Pipeline Errors
    // =============================

    /// Language-model call failed or returned an unusable shape.
    /// Recovered inside the adapters, never surfaced to callers.
    #[error("Oracle error: {0}")]
    Oracle(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Currency error: {0}")]
    Currency(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown error: {0}")]
    Unknown(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("UUID parse error: {0}")]
    Uuid(#[from] uuid::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatekeeperError {
    /// Oracle, validation and currency errors are recoverable with a safe default.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            GatekeeperError::Oracle(_)
                | GatekeeperError::Validation(_)
                | GatekeeperError::Currency(_)
                | GatekeeperError::Serialization(_)
                | GatekeeperError::Http(_)
        )
    }
}
