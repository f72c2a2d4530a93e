//! Error types for the NGSI client.

use crate::subscriptions::SubscriptionStatus;
use thiserror::Error;

/// Main error type for client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// An expression tree that cannot be rendered in the query language.
    #[error("Grammar error in term {term} at `{token}`: {reason}")]
    Grammar {
        term: usize,
        token: String,
        reason: String,
    },

    /// Query text that violates the query language.
    #[error("Syntax error at position {position} near `{token}`: {reason}")]
    Syntax {
        position: usize,
        token: String,
        reason: String,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Subscription not registered with the broker: {0}")]
    NotRegistered(String),

    #[error("Cannot {action} a subscription in status {status:?}")]
    InvalidTransition {
        status: SubscriptionStatus,
        action: &'static str,
    },

    /// The broker refused the request; `reason` is the broker's body verbatim.
    #[error("Rejected by broker (HTTP {status}): {reason}")]
    Rejected { status: u16, reason: String },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Unknown subscription: {0}")]
    UnknownSubscription(String),

    #[error("Page fetch failed: {0}")]
    PageFetch(#[source] TransportError),

    #[error("Cursor is closed after a failed page fetch")]
    CursorClosed,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Surface broker rejections as [`ClientError::Rejected`], keeping the
    /// broker's body as the reason.
    pub(crate) fn from_transport(e: TransportError) -> Self {
        match e {
            TransportError::Rejected { status, body } => ClientError::Rejected {
                status,
                reason: body,
            },
            other => ClientError::Transport(other),
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Serialization(e.to_string())
    }
}

/// Failures reported by a [`Transport`](crate::transport::Transport).
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The remote service answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The request never produced a response (connect, timeout, TLS...).
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        TransportError::Http(e.to_string())
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
