//! Unified error type for coursebridge.
//!
//! Every crate funnels its failures into [`Error`]. The variants follow the
//! import failure taxonomy: job-fatal kinds (`Configuration`, `Auth`,
//! `Transfer`, `CredentialState`) and row-scoped kinds (`Parse`, `Database`)
//! that the record transformer logs and skips.

use std::fmt;

/// Unified error type covering all failure modes in coursebridge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A stored provider credential or configuration value is unusable.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The provider rejected the credential refresh.
    #[error("Auth error: {0}")]
    Auth(String),

    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "export artifact", "provider").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// Download or extraction of a bulk export failed.
    #[error("Transfer error: {0}")]
    Transfer(String),

    /// A single provider record could not be parsed.
    #[error("Parse error: {0}")]
    Parse(String),

    /// A database operation failed.
    #[error("Database error: {source}")]
    Database {
        /// The underlying database error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The job deadline elapsed or a cancel signal was observed.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// The provider rotated the credential but the new pair could not be
    /// stored. The stored secret is stale and needs operator attention.
    #[error("Credential state error: {0}")]
    CredentialState(String),

    /// A job message or request failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The message bus is unreachable or closed.
    #[error("Bus error: {0}")]
    Bus(String),

    /// An external tool (yt-dlp) returned an error.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::NotFound { .. } => 404,
            Error::Validation(_) => 400,
            Error::Auth(_) => 502,
            Error::Transfer(_) => 502,
            Error::Tool { .. } => 502,
            Error::Bus(_) => 503,
            Error::Parse(_) => 422,
            Error::Cancelled(_) => 503,
            Error::Configuration(_)
            | Error::Database { .. }
            | Error::CredentialState(_)
            | Error::Io { .. }
            | Error::Internal(_) => 500,
        }
    }

    /// Whether this error should abort the whole job rather than a single row.
    pub fn is_job_fatal(&self) -> bool {
        !matches!(self, Error::Parse(_) | Error::Database { .. })
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Database`].
    pub fn database(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error::Database {
            source: source.into(),
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
