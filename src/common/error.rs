//! Error types for chorano

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Coordination Errors ===
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Node not found: {0}")]
    NotFound(String),

    #[error("Node already exists: {0}")]
    NodeExists(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Registry read failed at {path}: {reason}")]
    RegistryRead { path: String, reason: String },

    #[error("Already registered as {0}")]
    AlreadyRegistered(String),

    // === Network Errors ===
    #[error("Dispatch to {target} failed: {reason}")]
    Dispatch { target: String, reason: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Should this error terminate the process?
    ///
    /// Only session establishment and socket binding escalate; every other
    /// failure is scoped to one node, one request or one connection.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::ConnectionFailed(_) | Error::Bind { .. })
    }

    /// Wrap a coordination failure on `path` as a non-fatal registry read error.
    pub fn registry_read(path: &str, err: Error) -> Self {
        Error::RegistryRead {
            path: path.to_string(),
            reason: err.to_string(),
        }
    }

    pub fn dispatch(target: &str, reason: impl std::fmt::Display) -> Self {
        Error::Dispatch {
            target: target.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

// Implement From for common error types
impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(e.to_string())
    }
}
