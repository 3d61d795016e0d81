//! Store error types.

use thiserror::Error;

/// Errors produced by the store and its backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A user with this email already exists for the role
    #[error("Email already registered: {0}")]
    DuplicateEmail(String),

    /// A patient with this id already exists
    #[error("Patient already exists: {0}")]
    PatientExists(String),

    /// I/O error during backend operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend-specific failure
    #[error("Storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_duplicate_email() {
        let err = StoreError::DuplicateEmail("a@b.co".to_string());
        let msg = format!("{}", err);
        assert!(msg.contains("already registered"));
        assert!(msg.contains("a@b.co"));
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<u32>("nope").unwrap_err();
        let err: StoreError = json_err.into();
        assert!(format!("{}", err).contains("Serialization"));
    }
}
