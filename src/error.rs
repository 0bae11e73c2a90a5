//! Error and status types.
//!
//! [`Status`] is what an RPC handler returns to its caller: a [`Code`] and
//! a message. [`Error`] is the crate-wide error used by the driver client,
//! configuration loading and the transports; every variant maps to a
//! [`Code`] through [`Error::code`], which is what retry predicates look at.

use std::fmt;

use fleetbroker_state::StateError;
use serde::{Deserialize, Serialize};

/// RPC status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Code {
    /// Success.
    Ok,
    /// The request is malformed or refers to something that does not exist
    /// in a way the caller could have avoided.
    InvalidArgument,
    /// The requested entity was not found.
    NotFound,
    /// The caller could not be authenticated.
    Unauthenticated,
    /// The caller is authenticated but not allowed to do this.
    PermissionDenied,
    /// The service is temporarily unreachable. Retrying may help.
    Unavailable,
    /// The deadline expired before the operation completed.
    DeadlineExceeded,
    /// The method is not served by this endpoint.
    Unimplemented,
    /// Unexpected server-side failure.
    Internal,
}

impl Code {
    /// The HTTP status used for this code by the HTTP transport.
    pub fn http_status(self) -> http::StatusCode {
        match self {
            Self::Ok => http::StatusCode::OK,
            Self::InvalidArgument => http::StatusCode::BAD_REQUEST,
            Self::NotFound => http::StatusCode::NOT_FOUND,
            Self::Unauthenticated => http::StatusCode::UNAUTHORIZED,
            Self::PermissionDenied => http::StatusCode::FORBIDDEN,
            Self::Unavailable => http::StatusCode::SERVICE_UNAVAILABLE,
            Self::DeadlineExceeded => http::StatusCode::GATEWAY_TIMEOUT,
            Self::Unimplemented => http::StatusCode::NOT_IMPLEMENTED,
            Self::Internal => http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Inverse of [`http_status`](Self::http_status); unknown statuses map
    /// to [`Code::Internal`].
    pub fn from_http_status(status: http::StatusCode) -> Self {
        match status.as_u16() {
            200..=299 => Self::Ok,
            400 => Self::InvalidArgument,
            401 => Self::Unauthenticated,
            403 => Self::PermissionDenied,
            404 => Self::NotFound,
            501 => Self::Unimplemented,
            502 | 503 => Self::Unavailable,
            504 => Self::DeadlineExceeded,
            _ => Self::Internal,
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "ok",
            Self::InvalidArgument => "invalid argument",
            Self::NotFound => "not found",
            Self::Unauthenticated => "unauthenticated",
            Self::PermissionDenied => "permission denied",
            Self::Unavailable => "unavailable",
            Self::DeadlineExceeded => "deadline exceeded",
            Self::Unimplemented => "unimplemented",
            Self::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// The outcome of a failed RPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct Status {
    /// The status code.
    pub code: Code,
    /// Human-readable detail.
    pub message: String,
}

impl Status {
    /// Creates a status.
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// [`Code::InvalidArgument`] status.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    /// [`Code::NotFound`] status.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Code::NotFound, message)
    }

    /// [`Code::Unauthenticated`] status.
    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(Code::Unauthenticated, message)
    }

    /// [`Code::PermissionDenied`] status.
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(Code::PermissionDenied, message)
    }

    /// [`Code::Unavailable`] status.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(Code::Unavailable, message)
    }

    /// [`Code::DeadlineExceeded`] status.
    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(Code::DeadlineExceeded, message)
    }

    /// [`Code::Unimplemented`] status.
    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(Code::Unimplemented, message)
    }

    /// [`Code::Internal`] status.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Code::Internal, message)
    }
}

/// Caller contract violations are the caller's fault; anything else is a
/// server-side fault.
fn state_error_code(err: &StateError) -> Code {
    match err {
        StateError::InvalidLimit { .. } | StateError::InvalidNodeId => Code::InvalidArgument,
        _ => Code::Internal,
    }
}

impl From<StateError> for Status {
    fn from(err: StateError) -> Self {
        Self::new(state_error_code(&err), err.to_string())
    }
}

/// Crate-wide error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The remote side answered with a non-OK status.
    #[error("rpc failed: {0}")]
    Status(#[from] Status),

    /// The remote side could not be reached.
    #[error("transport error: {0}")]
    Transport(String),

    /// A message could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid or unreadable configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The state failed.
    #[error(transparent)]
    State(#[from] StateError),

    /// Key material could not be parsed or used.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// I/O failure (reading configuration or certificates).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Classifies the error for retry decisions.
    ///
    /// Transport failures count as [`Code::Unavailable`]; local failures
    /// (configuration, serialization, crypto, I/O) as [`Code::Internal`].
    pub fn code(&self) -> Code {
        match self {
            Self::Status(status) => status.code,
            Self::Transport(_) => Code::Unavailable,
            Self::State(err) => state_error_code(err),
            Self::Serialization(_) | Self::Configuration(_) | Self::Crypto(_) | Self::Io(_) => {
                Code::Internal
            },
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}

/// Convenience alias for results in this crate.
pub type Result<T> = std::result::Result<T, Error>;
