//! Error types for the runtime.
//!
//! # Design
//! Two kinds of failure exist and they travel differently. Construction and
//! registration problems (bad URL, duplicate source, a full ring on the
//! throwing `push`) are `CoreError` values returned to the calling thread.
//! The outcome of an individual HTTP request is never a Rust error: it is an
//! `ErrorCode` carried by the `HttpResponse` handed to the completion
//! callback, because it is produced on the loop thread long after `submit`
//! returned.

use std::fmt;
use std::io;

/// Errors returned synchronously by constructors and channel operations.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A bounded channel is full and the message was not enqueued.
    #[error("the message queue is full (capacity {capacity})")]
    CapacityExceeded { capacity: usize },

    /// A bounded channel was created with a zero capacity.
    #[error("channel capacity must be positive")]
    InvalidCapacity,

    /// The base URL could not be parsed.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// The base URL uses a scheme the transport does not speak.
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An event source with this name is already registered.
    #[error("event source already registered: {0}")]
    DuplicateSource(String),

    /// No event source with this name is registered.
    #[error("unknown event source: {0}")]
    UnknownSource(String),

    /// OS-level failure creating or driving a descriptor.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Configuration JSON could not be decoded.
    #[error("config error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Classification of a finished request, delivered with every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The server answered; `status` is meaningful.
    Success,
    /// No terminal state was reached before the request's timeout.
    Timeout,
    /// The TCP connection could not be established.
    CouldNotConnect,
    /// The host name of the base URL did not resolve.
    HostUnknown,
    /// Transport failure after connecting, or a malformed response.
    Other,
}

impl ErrorCode {
    pub fn is_success(self) -> bool {
        self == ErrorCode::Success
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Success => write!(f, "success"),
            ErrorCode::Timeout => write!(f, "timeout"),
            ErrorCode::CouldNotConnect => write!(f, "could not connect"),
            ErrorCode::HostUnknown => write!(f, "host unknown"),
            ErrorCode::Other => write!(f, "transport error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_error_names_the_capacity() {
        let err = CoreError::CapacityExceeded { capacity: 8 };
        assert_eq!(err.to_string(), "the message queue is full (capacity 8)");
    }

    #[test]
    fn io_errors_convert() {
        let err: CoreError = io::Error::from(io::ErrorKind::WouldBlock).into();
        assert!(matches!(err, CoreError::Io(_)));
    }

    #[test]
    fn only_success_is_success() {
        assert!(ErrorCode::Success.is_success());
        for code in [
            ErrorCode::Timeout,
            ErrorCode::CouldNotConnect,
            ErrorCode::HostUnknown,
            ErrorCode::Other,
        ] {
            assert!(!code.is_success(), "{code}");
        }
    }
}
