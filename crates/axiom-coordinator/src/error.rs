//! Error types for the ceremony coordinator

use thiserror::Error;

use axiom_ceremony::CeremonyError;

/// Result type alias for coordinator operations
pub type Result<T> = std::result::Result<T, CoordinatorError>;

/// Errors that can occur in the coordinator
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Rejected by the ceremony state machine
    #[error(transparent)]
    Ceremony(#[from] CeremonyError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Malformed audit log
    #[error("Audit log error: {0}")]
    AuditLog(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Ceremony not found
    #[error("Ceremony not found: {0}")]
    NotFound(String),

    /// Ceremony already exists
    #[error("Ceremony already exists: {0}")]
    AlreadyExists(String),

    /// Another process holds the ceremony lock
    #[error("Ceremony {id} is locked by another process (lock file {path})")]
    Locked { id: String, path: String },
}

impl CoordinatorError {
    /// The underlying ceremony error, if this is one
    pub fn as_ceremony(&self) -> Option<&CeremonyError> {
        match self {
            CoordinatorError::Ceremony(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for CoordinatorError {
    fn from(e: serde_json::Error) -> Self {
        CoordinatorError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for CoordinatorError {
    fn from(e: toml::de::Error) -> Self {
        CoordinatorError::Config(e.to_string())
    }
}
