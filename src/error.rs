//! Error types for the opportunity engine

use crate::session::SessionState;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the opportunity engine
///
/// Per-agent query failures are not represented here: they are recorded as
/// [`FailureReason`](crate::collector::FailureReason) values inside the
/// collection and never abort a run on their own.
#[derive(Debug, Error)]
pub enum Error {
    /// The document could not be ingested, so there is nothing to analyze
    #[error("Ingestion failed: {0}")]
    Ingestion(String),

    /// No agent produced a usable insight
    #[error("No signal: {0}")]
    NoSignal(String),

    /// Deleting the analyzed document failed
    #[error("Cleanup failed: {0}")]
    Cleanup(String),

    /// The caller cancelled the run
    #[error("Analysis cancelled: {0}")]
    Cancelled(String),

    /// A lifecycle transition was requested out of order
    #[error("Invalid session transition: {from:?} -> {to:?}")]
    InvalidTransition {
        /// State the session was in
        from: SessionState,
        /// State that was requested
        to: SessionState,
    },

    /// Agent id is not part of the registry
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    /// Session id is not retained by the orchestrator
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Error reported by the document-understanding backend
    #[error("Backend error: {0}")]
    Backend(String),

    /// Timeout error
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Error reported by the language-synthesis backend or theme parsing
    #[error("Synthesis error: {0}")]
    Synthesis(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an ingestion error
    pub fn ingestion(msg: impl Into<String>) -> Self {
        Self::Ingestion(msg.into())
    }

    /// Create a no-signal error
    pub fn no_signal(msg: impl Into<String>) -> Self {
        Self::NoSignal(msg.into())
    }

    /// Create a cleanup error
    pub fn cleanup(msg: impl Into<String>) -> Self {
        Self::Cleanup(msg.into())
    }

    /// Create a cancellation error
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Create a backend error
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a synthesis error
    pub fn synthesis(msg: impl Into<String>) -> Self {
        Self::Synthesis(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error aborts an analysis run.
    ///
    /// Cleanup failures are recorded next to a result, never in place of it.
    /// Cancellation is a caller-requested abort.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Cleanup(_) | Self::Cancelled(_))
    }
}
