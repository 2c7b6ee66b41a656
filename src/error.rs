//! Error types for the orchestration core.

/// All possible errors produced by the orchestration core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing/invalid inputs, wrong currency for a terminal, foreign card on non-TRY.
    #[error("validation error: {0}")]
    Validation(String),

    /// Terminal, transaction, or company not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate (company, bankCode) terminal binding, or similar uniqueness violation.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Encryption/decryption failure, including callback-packet decode.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// An acquirer refusal, carrying the acquirer's native code.
    #[error("provider error [{code}]: {message}")]
    Provider {
        /// Acquirer-native error code.
        code: String,
        /// Acquirer-native error message.
        message: String,
    },

    /// HTTPS timeout or transport failure talking to an acquirer.
    #[error("network error: {0}")]
    Network(String),

    /// Operation attempted on a transaction in a disallowed state.
    #[error("state error: {0}")]
    State(String),

    /// Provider tag has no registered adapter.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// No active terminal satisfies the selection policy.
    #[error("no suitable terminal for company {company} currency {currency}")]
    NoSuitableTerminal {
        /// Company the selection was attempted for.
        company: String,
        /// Currency requested.
        currency: String,
    },

    /// HTTP transport error talking to an acquirer or the BIN resolver.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// XML serialization/deserialization error.
    #[error("xml error: {0}")]
    Xml(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Database error (when `postgres-store` feature is enabled).
    #[cfg(feature = "postgres-store")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl Error {
    /// Returns true if retrying the same operation might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Http(_))
    }

    /// Shorthand for building a [`Error::Provider`] from acquirer-native fields.
    pub fn provider(code: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Provider {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for orchestration-core operations.
pub type Result<T> = std::result::Result<T, Error>;
