//! Error types for the email catcher.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Mail error: {0}")]
    Mail(#[from] MailError),

    #[error("Stage error: {0}")]
    Stage(#[from] StageError),

    #[error("Address error: {0}")]
    Address(#[from] AddressError),

    #[error("Trigger error: {0}")]
    Trigger(#[from] TriggerError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Object store errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("Invalid object key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Object store throttled request for {bucket}/{key}")]
    Throttled { bucket: String, key: String },

    #[error("Object store backend error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Metadata store errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Metadata store throttled request: {0}")]
    Throttled(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("No summarization provider configured")]
    NotConfigured,
}

/// Inbound payload and MIME errors.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Malformed notification: {0}")]
    MalformedNotification(String),

    #[error("Notification is missing {0}")]
    MissingField(&'static str),

    #[error("Failed to parse MIME document {key}")]
    MimeParse { key: String },

    #[error("Document {key} has no readable body")]
    NoBody { key: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure of one pipeline stage invocation.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("{0}")]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Database(#[from] DatabaseError),

    #[error("{0}")]
    Mail(#[from] MailError),

    #[error("Stage {stage} timed out after {timeout:?}")]
    Timeout { stage: String, timeout: Duration },
}

impl StageError {
    /// Whether the orchestrator should retry an invocation that failed with this error.
    ///
    /// Only transient infrastructure classes qualify: throttling, backend/service
    /// exceptions, client-side I/O and invocation timeouts.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(e) => matches!(
                e,
                StorageError::Throttled { .. } | StorageError::Backend(_) | StorageError::Io(_)
            ),
            Self::Database(e) => matches!(
                e,
                DatabaseError::Pool(_) | DatabaseError::Query(_) | DatabaseError::Throttled(_)
            ),
            Self::Mail(_) => false,
            Self::Timeout { .. } => true,
        }
    }

    /// Short error class label for logging and execution reports.
    pub fn class(&self) -> &'static str {
        match self {
            Self::Storage(StorageError::Throttled { .. })
            | Self::Database(DatabaseError::Throttled(_)) => "throttling",
            Self::Storage(StorageError::Io(_)) => "client",
            Self::Storage(StorageError::Backend(_))
            | Self::Database(DatabaseError::Pool(_))
            | Self::Database(DatabaseError::Query(_)) => "service",
            Self::Storage(StorageError::NotFound { .. })
            | Self::Database(DatabaseError::NotFound { .. }) => "not_found",
            Self::Storage(_) | Self::Database(_) => "invalid_request",
            Self::Mail(_) => "malformed_input",
            Self::Timeout { .. } => "timeout",
        }
    }
}

/// Mailbox management errors.
#[derive(Debug, thiserror::Error)]
pub enum AddressError {
    #[error("Invalid address: {0}")]
    Invalid(String),

    #[error("Address {0} already exists")]
    AlreadyExists(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors handing a notification to the pipeline trigger.
#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("Rejected notification: {0}")]
    Rejected(#[from] MailError),

    #[error("Pipeline trigger is shut down")]
    Closed,
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
