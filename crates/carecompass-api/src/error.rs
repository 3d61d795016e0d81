//! Client error types

use thiserror::Error;

/// Errors returned by [`ApiClient`](crate::ApiClient)
#[derive(Debug, Error)]
pub enum ClientError {
    /// Missing, invalid or expired session (401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Resource not found (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Any other non-success response
    #[error("Server returned {status}: {message}")]
    Api { status: u16, message: String },

    /// Server could not be reached or did not answer in time
    #[error("Server unavailable: {0}")]
    Unavailable(String),

    /// Transport or decoding error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Base URL cannot carry a path
    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),
}

impl ClientError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ClientError::Unauthorized(_))
    }

    /// Whether the failure means the server is unreachable rather than
    /// that it rejected the request.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, ClientError::Unavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_api() {
        let err = ClientError::Api {
            status: 409,
            message: "Email already registered".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("409"));
        assert!(msg.contains("Email already registered"));
    }

    #[test]
    fn test_error_classes() {
        assert!(ClientError::Unauthorized("x".into()).is_unauthorized());
        assert!(!ClientError::NotFound("x".into()).is_unauthorized());
        assert!(ClientError::Unavailable("refused".into()).is_unavailable());
    }
}
