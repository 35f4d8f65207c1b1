// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for bridge operations.

use std::fmt;
use std::os::raw::c_int;

/// Kind of native resource involved in a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Session,
    Publisher,
    Subscriber,
    Queryable,
    LivelinessToken,
    LivelinessSubscriber,
    Query,
}

impl ResourceKind {
    /// Human readable name, used in logs and error messages.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Publisher => "publisher",
            Self::Subscriber => "subscriber",
            Self::Queryable => "queryable",
            Self::LivelinessToken => "liveliness token",
            Self::LivelinessSubscriber => "liveliness subscriber",
            Self::Query => "query",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by bridge operations.
///
/// Native failures carry the engine status code where the ABI provides one.
/// Validation failures are detected locally, before any native call.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Native call failures (retryable)
    // ========================================================================
    /// The engine refused to open a session.
    OpenFailed(String),
    /// A declare call returned a null handle.
    DeclareFailed { kind: ResourceKind },
    /// A put was rejected; the sample must not be considered delivered.
    PutFailed { code: Option<c_int> },
    /// A delete was rejected.
    DeleteFailed { code: Option<c_int> },
    /// An operation did not complete within its deadline.
    Timeout,
    /// Native status code with no specific local mapping.
    EngineError { code: c_int },

    // ========================================================================
    // Local failures (never retried)
    // ========================================================================
    /// Key expression or selector rejected by local validation.
    InvalidKeyExpression(String),
    /// Retry policy gave up; carries the last failure.
    RetryExhausted { attempts: u32, last: Box<Error> },
    /// The owning session was closed.
    SessionClosed,
    /// The resource was already undeclared.
    Undeclared(ResourceKind),
    /// Invalid configuration value.
    InvalidConfig(String),
    /// Argument cannot cross the C boundary (e.g. interior NUL byte).
    InvalidArgument(String),
}

impl Error {
    /// Whether the retry executor may attempt the operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::OpenFailed(_)
                | Error::DeclareFailed { .. }
                | Error::PutFailed { .. }
                | Error::DeleteFailed { .. }
                | Error::Timeout
                | Error::EngineError { .. }
        )
    }

    /// Native status code attached to this error, if any.
    pub fn native_code(&self) -> Option<c_int> {
        match self {
            Error::PutFailed { code } | Error::DeleteFailed { code } => *code,
            Error::EngineError { code } => Some(*code),
            Error::RetryExhausted { last, .. } => last.native_code(),
            _ => None,
        }
    }

    pub(crate) fn put_failed(code: c_int) -> Self {
        Error::PutFailed { code: Some(code) }
    }

    pub(crate) fn delete_failed(code: c_int) -> Self {
        Error::DeleteFailed { code: Some(code) }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::OpenFailed(msg) => write!(f, "Failed to open session: {}", msg),
            Error::DeclareFailed { kind } => write!(f, "Failed to declare {}", kind),
            Error::PutFailed { code: Some(code) } => write!(f, "Put failed (status {})", code),
            Error::PutFailed { code: None } => write!(f, "Put failed"),
            Error::DeleteFailed { code: Some(code) } => {
                write!(f, "Delete failed (status {})", code)
            }
            Error::DeleteFailed { code: None } => write!(f, "Delete failed"),
            Error::Timeout => write!(f, "Operation timed out"),
            Error::EngineError { code } => write!(f, "Native engine error (status {})", code),
            Error::InvalidKeyExpression(msg) => write!(f, "Invalid key expression: {}", msg),
            Error::RetryExhausted { attempts, last } => {
                write!(f, "Retry exhausted after {} attempts: {}", attempts, last)
            }
            Error::SessionClosed => write!(f, "Session is closed"),
            Error::Undeclared(kind) => write!(f, "The {} was already undeclared", kind),
            Error::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::RetryExhausted { last, .. } => Some(last.as_ref()),
            _ => None,
        }
    }
}

/// Convenient alias for bridge results.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_classification() {
        assert!(Error::OpenFailed("refused".into()).is_retryable());
        assert!(Error::DeclareFailed {
            kind: ResourceKind::Subscriber
        }
        .is_retryable());
        assert!(Error::Timeout.is_retryable());
        assert!(Error::EngineError { code: -1 }.is_retryable());

        assert!(!Error::InvalidKeyExpression("a//b".into()).is_retryable());
        assert!(!Error::SessionClosed.is_retryable());
        assert!(!Error::Undeclared(ResourceKind::Publisher).is_retryable());
        assert!(!Error::RetryExhausted {
            attempts: 3,
            last: Box::new(Error::Timeout)
        }
        .is_retryable());
    }

    #[test]
    fn display_includes_native_code() {
        let err = Error::put_failed(-7);
        assert!(err.to_string().contains("-7"));
        assert_eq!(err.native_code(), Some(-7));

        let err = Error::DeclareFailed {
            kind: ResourceKind::Queryable,
        };
        assert!(err.to_string().contains("queryable"));
    }

    #[test]
    fn retry_exhausted_exposes_source() {
        use std::error::Error as _;

        let err = Error::RetryExhausted {
            attempts: 2,
            last: Box::new(Error::EngineError { code: -3 }),
        };
        assert_eq!(err.native_code(), Some(-3));
        assert!(err.source().is_some());
        assert!(err.to_string().contains("2 attempts"));
    }
}
