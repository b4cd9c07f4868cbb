//! Error types for the pipe layer.
//!
//! # Design
//! Every non-2xx response becomes an `HttpError` carrying the raw status and
//! body bytes, captured together from the same response. Authorization
//! challenges are not a separate variant: they are `HttpError`s whose status
//! is 401 or 403, so a retried call that fails again surfaces exactly the
//! same shape as any other remote error.

use std::fmt;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PipeError>;

/// A non-success response observed by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    status_code: u16,
    data: Vec<u8>,
}

impl HttpError {
    pub fn new(status_code: u16, data: Vec<u8>) -> Self {
        Self { status_code, data }
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    /// Raw error body returned by the remote peer.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// True when the peer rejected the request's credentials.
    pub fn is_authorization_challenge(&self) -> bool {
        matches!(self.status_code, 401 | 403)
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HTTP {}: {}",
            self.status_code,
            String::from_utf8_lossy(&self.data)
        )
    }
}

impl std::error::Error for HttpError {}

/// Errors raised by transports, authentication modules and pipes.
#[derive(Debug, Error)]
pub enum PipeError {
    /// The server answered with a status of 300 or above.
    #[error(transparent)]
    Http(#[from] HttpError),

    /// A caller passed a value the operation cannot work with.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The connection could not be established or broke mid-exchange.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be serialized or a response body parsed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Logout was requested while no session token is held.
    #[error("not logged in")]
    NotLoggedIn,
}

impl PipeError {
    /// The wrapped `HttpError`, if this error came from a remote response.
    pub fn as_http(&self) -> Option<&HttpError> {
        match self {
            PipeError::Http(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_authorization_challenge(&self) -> bool {
        self.as_http()
            .is_some_and(HttpError::is_authorization_challenge)
    }
}
