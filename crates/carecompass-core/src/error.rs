//! Core error types for CareCompass.

use thiserror::Error;

/// Errors that can occur in core operations
#[derive(Debug, Error)]
pub enum CoreError {
    /// Role string is neither `doctor` nor `caregiver`
    #[error("Invalid role: {0}")]
    InvalidRole(String),

    /// Time string is not `HH:MM`
    #[error("Invalid time of day: {0}")]
    InvalidTime(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("Config error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_invalid_role() {
        let err = CoreError::InvalidRole("nurse".to_string());
        let msg = format!("{}", err);
        assert!(msg.contains("Invalid role"));
        assert!(msg.contains("nurse"));
    }

    #[test]
    fn test_error_display_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: CoreError = io_err.into();
        assert!(format!("{}", err).contains("file not found"));
    }
}
