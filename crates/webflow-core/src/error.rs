//! Error types for webflow-core

use crate::response::StatusCode;
use crate::storage::StorageError;
use thiserror::Error;

/// Result type alias for webflow operations
pub type Result<T> = std::result::Result<T, Error>;

/// Request-scoped rejections. Each maps onto a 4xx reply and leaves the
/// connection usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    UriTooLong,
}

impl Rejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Rejection::BadRequest => StatusCode::BAD_REQUEST,
            Rejection::Unauthorized => StatusCode::UNAUTHORIZED,
            Rejection::Forbidden => StatusCode::FORBIDDEN,
            Rejection::NotFound => StatusCode::NOT_FOUND,
            Rejection::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Rejection::UriTooLong => StatusCode::URI_TOO_LONG,
        }
    }
}

/// Error types for the web workflow server
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed request line or header framing. Fatal for the connection.
    #[error("Protocol error: {0}")]
    Protocol(&'static str),

    /// Bad origin, credentials, path or method
    #[error("Request rejected: {0:?}")]
    Validation(Rejection),

    /// Storage is currently held by USB mass storage
    #[error("USB storage active")]
    Conflict,

    /// The storage could not grow a file to the declared length
    #[error("Storage cannot hold {requested} bytes")]
    Capacity { requested: u64, expected: bool },

    /// Storage collaborator failure
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// JSON document generation failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Peer went away or the socket refused data
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),
}

impl Error {
    /// Status code for the reply this error produces, or `None` when the
    /// connection has to be abandoned without a reply.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Protocol(_) => Some(StatusCode::NOT_IMPLEMENTED),
            Error::Validation(rejection) => Some(rejection.status()),
            Error::Conflict => Some(StatusCode::CONFLICT),
            Error::Capacity { expected: true, .. } => Some(StatusCode::EXPECTATION_FAILED),
            Error::Capacity { expected: false, .. } => Some(StatusCode::PAYLOAD_TOO_LARGE),
            Error::Storage(StorageError::NotFound | StorageError::NoPath) => {
                Some(StatusCode::NOT_FOUND)
            }
            Error::Storage(StorageError::NoSpace) => Some(StatusCode::PAYLOAD_TOO_LARGE),
            Error::Storage(_) | Error::Json(_) => Some(StatusCode::INTERNAL_SERVER_ERROR),
            Error::Transport(_) => None,
        }
    }

    /// Whether the connection must be dropped after this error
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Protocol(_) | Error::Transport(_))
    }
}

impl From<Rejection> for Error {
    fn from(rejection: Rejection) -> Self {
        Error::Validation(rejection)
    }
}
