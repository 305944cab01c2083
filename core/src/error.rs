//! Error types for the Data API client.
//!
//! # Design
//! Each variant answers a different remediation question for the caller:
//! `Transport` is the only one that is safe to retry as-is, `Service` and
//! `SessionRejected` carry the vendor code and message verbatim, and
//! `MalformedResponse` means the reply no longer has the envelope shape this
//! crate understands.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = ApiError> = std::result::Result<T, E>;

/// Errors produced while building requests or interpreting responses.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// A required connection setting (host, database, credentials) is absent.
    #[error("missing configuration: {0}")]
    MissingConfiguration(&'static str),

    /// No HTTP response was obtained.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The body was not a well-formed envelope, or a required field was
    /// missing from a successful reply.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The envelope carried a non-zero status code.
    #[error("service error {code}: {message}")]
    Service { code: String, message: String },

    /// The sessions endpoint refused to issue a token.
    #[error("session rejected {code}: {message}")]
    SessionRejected { code: String, message: String },

    /// The request payload could not be serialized.
    #[error("encoding failure: {0}")]
    Encoding(String),
}

impl ApiError {
    /// True only when repeating the identical call could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Transport(_))
    }

    /// The vendor status code, if the service produced one.
    pub fn service_code(&self) -> Option<&str> {
        match self {
            ApiError::Service { code, .. } | ApiError::SessionRejected { code, .. } => Some(code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_is_retryable() {
        assert!(ApiError::Transport("reset".into()).is_retryable());
        assert!(!ApiError::MissingConfiguration("host").is_retryable());
        assert!(!ApiError::MalformedResponse("x".into()).is_retryable());
        assert!(!ApiError::Encoding("x".into()).is_retryable());
        let service = ApiError::Service {
            code: "952".into(),
            message: "Invalid FileMaker Data API token".into(),
        };
        assert!(!service.is_retryable());
    }

    #[test]
    fn service_code_is_exposed_verbatim() {
        let err = ApiError::SessionRejected {
            code: "212".into(),
            message: "Invalid user account and/or password".into(),
        };
        assert_eq!(err.service_code(), Some("212"));
        assert_eq!(ApiError::Transport("x".into()).service_code(), None);
    }

    #[test]
    fn display_keeps_code_and_message() {
        let err = ApiError::Service {
            code: "401".into(),
            message: "No records match the request".into(),
        };
        assert_eq!(err.to_string(), "service error 401: No records match the request");
    }
}
