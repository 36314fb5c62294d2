use thiserror::Error;

/// Crate-wide failure taxonomy. Kinds, not call sites: every subsystem maps
/// its failures onto one of these so callers can route on the kind alone.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage failure: {0}")]
    StorageFailure(String),

    #[error("Transient network failure: {0}")]
    NetworkTransient(String),

    #[error("Permanent network failure: {0}")]
    NetworkPermanent(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Rejected by policy: {0}")]
    PolicyReject(String),

    #[error("Handler failure: {0}")]
    HandlerFailure(String),

    #[error("Remote peer reported failure: {0}")]
    RemoteFailure(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("File not found or could not be read: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse JSON: {0}")]
    DeserializationError(#[from] serde_json::Error),
}

impl Error {
    /// Timeouts are indistinguishable from permanent network failures at the
    /// kernel level; both fail the bound reservation the same way.
    pub fn is_permanent_network(&self) -> bool {
        matches!(self, Error::NetworkPermanent(_) | Error::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
