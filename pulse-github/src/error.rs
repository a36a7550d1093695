//! Error types for GitHub operations

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::graphql::ApiError;

/// Result type for GitHub operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to GitHub or interpreting its data
#[derive(Error, Debug)]
pub enum Error {
    /// Connection-level failure (DNS, TLS, reset, timeout)
    #[error("GraphQL request failed: {0}")]
    Transport(String),

    /// Non-success HTTP status
    #[error("GraphQL request failed with status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// Response body is not a GraphQL response
    #[error("Malformed GraphQL response: {0}")]
    Protocol(String),

    /// In-band GraphQL errors with no usable data
    #[error("GraphQL errors: {}", join_messages(.0))]
    Application(Vec<ApiError>),

    /// Primary or secondary rate limit hit
    #[error("GitHub rate limit exceeded{}: {message}", reset_suffix(.reset_at))]
    RateLimited {
        reset_at: Option<DateTime<Utc>>,
        message: String,
    },

    /// Embedded `owner/name` reference that cannot be split
    #[error("Malformed repository reference: {0}")]
    ReferenceParse(String),

    /// Repository or pull request that no longer resolves
    #[error("{0} not found")]
    MissingEntity(String),

    /// Request count or wall-clock budget used up
    #[error("Request budget exhausted: {0}")]
    BudgetExhausted(String),

    /// Authentication error
    #[error("GitHub authentication error: {0}")]
    Auth(String),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Configuration or credential error
    #[error(transparent)]
    Core(#[from] pulse_core::Error),
}

impl Error {
    /// Whether a retry after waiting may succeed
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Error::RateLimited { .. })
    }

    /// Whether the failure happened below the GraphQL layer
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::HttpStatus { .. })
    }

    /// Whether the failure is confined to one unit of work
    ///
    /// Credential and configuration problems affect every request and
    /// should end the run.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::Auth(_) | Error::Core(_))
    }
}

fn join_messages(errors: &[ApiError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn reset_suffix(reset_at: &Option<DateTime<Utc>>) -> String {
    match reset_at {
        Some(at) => format!(", resets at {}", at.to_rfc3339()),
        None => String::new(),
    }
}
