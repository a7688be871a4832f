//! Error types for Bumby.

use uuid::Uuid;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors from the outbound messaging provider.
#[derive(Debug, thiserror::Error)]
pub enum SenderError {
    /// The provider answered with an error; carries the provider's message.
    #[error("{0}")]
    Provider(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Errors raised by the auto-reply dispatcher (never by rule evaluation itself).
#[derive(Debug, thiserror::Error)]
pub enum AutoReplyError {
    #[error("Account {0} not found")]
    AccountNotFound(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Request authorization failures.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing API key")]
    MissingCredentials,

    #[error("Invalid API key")]
    InvalidCredentials,

    #[error("Admin access required")]
    Forbidden,

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Input validation errors surfaced to API callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Missing required fields: {0}")]
    MissingFields(String),

    #[error("Tactic '{tactic}' row {row}: {reason}")]
    InvalidRule {
        tactic: String,
        row: usize,
        reason: String,
    },

    #[error("Duplicate tactic name: {0}")]
    DuplicateTactic(String),

    #[error("Unknown tactic: {0}")]
    UnknownTactic(String),
}
