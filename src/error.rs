//! Error types for Bounce Sweep.

/// Top-level error type for a sweep run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Recipient store error: {0}")]
    Store(#[from] StoreError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Mailbox transport errors. Any of these aborts the mailbox stage —
/// there is no retry, and the session is closed before surfacing.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Mailbox task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Recipient store errors. These abort only the apply stage — the
/// mailbox stage has already committed its deletions by then.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to open store: {0}")]
    Open(String),

    #[error("Query failed: {0}")]
    Query(String),
}

/// Result type alias for the sweeper.
pub type Result<T> = std::result::Result<T, Error>;
