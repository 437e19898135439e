//! Error types for Random Coffee.

use crate::clock::YearWeek;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Dialog error: {0}")]
    Dialog(#[from] DialogError),

    #[error("Matching error: {0}")]
    Matching(#[from] MatchingError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

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

/// Chat transport errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send message on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Failed to edit message on channel {name}: {reason}")]
    EditFailed { name: String, reason: String },

    #[error("Invalid update format: {0}")]
    InvalidUpdate(String),
}

/// Conversation state machine errors.
///
/// Input validation problems never show up here: they are answered with a
/// re-prompt inside the dialog.
#[derive(Debug, thiserror::Error)]
pub enum DialogError {
    #[error("Participant {0} has no stored record")]
    ParticipantMissing(String),

    #[error("Stored conversation state for {participant} is malformed: {reason}")]
    MalformedState { participant: String, reason: String },
}

/// Matching engine errors. Infeasible cohorts are not errors.
#[derive(Debug, thiserror::Error)]
pub enum MatchingError {
    #[error("Pairing references participant {participant} outside the cohort of {week}")]
    UnknownParticipant { participant: String, week: YearWeek },

    #[error("Meeting details for {0} were already broadcast")]
    AlreadyBroadcast(YearWeek),
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
