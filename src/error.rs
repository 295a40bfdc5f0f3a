//! Error types for the matchmaking and match synchronization engine
//!
//! This module defines all error types using anyhow for consistent error handling
//! throughout the application.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific matchmaking and sync scenarios
#[derive(Debug, thiserror::Error)]
pub enum ArenaError {
    #[error("User {user_id} is already queued for mode {mode}")]
    AlreadyQueued { user_id: String, mode: String },

    #[error("User {user_id} is already in an active {mode} match")]
    AlreadyInMatch { user_id: String, mode: String },

    #[error("Invalid mode: {value}")]
    InvalidMode { value: String },

    #[error("Match not found: {match_id}")]
    MatchNotFound { match_id: String },

    #[error("User {user_id} is not a participant of match {match_id}")]
    NotAParticipant { user_id: String, match_id: String },

    #[error("Match {match_id} is terminal ({status}), no further mutation permitted")]
    MatchTerminal { match_id: String, status: String },

    /// Internal retry signal for concurrent pairing attempts. Never surfaced
    /// to callers; the service retries and reports a transient failure instead.
    #[error("Pairing race on mode {mode}")]
    PairingRace { mode: String },

    #[error("Transport disconnected: {reason}")]
    TransportDisconnected { reason: String },

    #[error("AMQP connection failed: {message}")]
    AmqpConnectionFailed { message: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl ArenaError {
    /// Whether the caller may safely retry the failed operation.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ArenaError::PairingRace { .. } | ArenaError::TransportDisconnected { .. }
        )
    }
}
