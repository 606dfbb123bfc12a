//! Unified error types for the engine
//!
//! Variants follow the failure taxonomy of the poll path: connection and
//! search errors park an integration in ERROR state, parse and ingestion
//! errors skip a single email, everything else is surfaced to the caller.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Engine error type used across the poller, matcher and ingestion pipeline.
///
/// All errors are serializable so integration health records and operational
/// status endpoints can carry them verbatim.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Ingestion error: {0}")]
    Ingestion(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Integration not found: {0}")]
    IntegrationNotFound(String),

    #[error("Ticket not found: {0}")]
    TicketNotFound(String),

    #[error("Mailbox poll timed out after {0}s")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(String),

    #[error("{0}")]
    Other(String),
}

impl BridgeError {
    /// Whether this failure should park the integration in ERROR state.
    ///
    /// Connection and search failures indicate the mailbox itself is
    /// unhealthy; parse and ingestion failures are scoped to one email and
    /// leave the integration ACTIVE.
    pub fn is_integration_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::Connection(_) | BridgeError::Search(_) | BridgeError::Timeout(_)
        )
    }
}

// Implement From for common error types

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for BridgeError {
    fn from(err: toml::de::Error) -> Self {
        BridgeError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Parse(err.to_string())
    }
}

impl From<String> for BridgeError {
    fn from(err: String) -> Self {
        BridgeError::Other(err)
    }
}

impl From<&str> for BridgeError {
    fn from(err: &str) -> Self {
        BridgeError::Other(err.to_string())
    }
}

/// Result type alias using BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;
