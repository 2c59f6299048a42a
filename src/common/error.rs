//! Error types for the matrix engine
//!
//! Configuration errors abort a matrix run before any tuple executes.
//! Session and measurement errors classify a single tuple's verdict and
//! never leak across tuples.

use thiserror::Error;

use crate::session::SessionId;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the matrix engine
#[derive(Error, Debug)]
pub enum Error {
    // === Configuration Errors ===
    #[error("Role '{0}' has no candidate session configurations")]
    EmptyRole(String),

    #[error("Test declares {required} participants but {available} roles are configured")]
    RoleCountMismatch { required: usize, available: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    // === Session Errors ===
    #[error("Session {session} crashed: {message}")]
    SessionCrashed { session: SessionId, message: String },

    #[error("Failed to acquire a session for role '{role}': {message}")]
    SessionAcquire { role: String, message: String },

    #[error("Probe '{probe}' failed on session {session}: {message}")]
    ProbeFailed {
        probe: String,
        session: SessionId,
        message: String,
    },

    // === Measurement Errors ===
    #[error("Metric window is unusable: {0}")]
    InvalidWindow(String),

    #[error("Cannot derive a rate over a non-positive interval ({elapsed_ms} ms)")]
    NonPositiveElapsed { elapsed_ms: i64 },

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create the distinguished session-crash error
    pub fn session_crashed(session: SessionId, message: &str) -> Self {
        Self::SessionCrashed {
            session,
            message: message.to_string(),
        }
    }

    /// Create a session acquisition error
    pub fn session_acquire(role: &str, message: &str) -> Self {
        Self::SessionAcquire {
            role: role.to_string(),
            message: message.to_string(),
        }
    }

    /// Create a probe failure error
    pub fn probe_failed(probe: &str, session: SessionId, message: &str) -> Self {
        Self::ProbeFailed {
            probe: probe.to_string(),
            session,
            message: message.to_string(),
        }
    }

    /// Create an invalid metric window error
    pub fn invalid_window(message: impl Into<String>) -> Self {
        Self::InvalidWindow(message.into())
    }

    /// Whether this is the distinguished crash condition that tuple
    /// recovery reacts to
    pub fn is_crash(&self) -> bool {
        matches!(self, Self::SessionCrashed { .. })
    }

    /// Whether this error family aborts a matrix before execution
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::EmptyRole(_) | Self::RoleCountMismatch { .. } | Self::Config(_)
        )
    }
}
