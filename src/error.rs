//! Error types for Stowbox.

use thiserror::Error;
use uuid::Uuid;

/// Common error type for Stowbox.
///
/// These are request-level failures. Problems with individual nodes during a
/// tree walk are accumulated in [`crate::deletion::ErrorLog`] instead.
#[derive(Error, Debug)]
pub enum StowError {
    /// Database error.
    ///
    /// Database errors from sqlx are automatically converted.
    #[error("database error: {0}")]
    Database(String),

    /// Database connection error.
    #[error("database connection error: {0}")]
    DatabaseConnection(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Blob store error.
    #[error("blob store error: {0}")]
    Blob(String),

    /// Validation error for user input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Resource not found (or not owned by the caller).
    #[error("{0} not found")]
    NotFound(String),

    /// The upload would push the owner past their storage limit.
    #[error("storage limit exceeded: {required} bytes required, {available} of {limit} available")]
    QuotaExceeded {
        /// Size of the incoming content.
        required: u64,
        /// Bytes still free under the limit.
        available: u64,
        /// Configured limit.
        limit: u64,
    },

    /// The metadata row of the requested node could not be deleted.
    #[error("failed to delete metadata for {id}: {message}")]
    MetadataDeletion {
        /// Node or item ID.
        id: Uuid,
        /// Underlying store message.
        message: String,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<sqlx::Error> for StowError {
    fn from(e: sqlx::Error) -> Self {
        StowError::Database(e.to_string())
    }
}

/// Result type alias for Stowbox operations.
pub type Result<T> = std::result::Result<T, StowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = StowError::Validation("name is required".to_string());
        assert_eq!(err.to_string(), "validation error: name is required");
    }

    #[test]
    fn test_not_found_error_display() {
        let err = StowError::NotFound("node".to_string());
        assert_eq!(err.to_string(), "node not found");
    }

    #[test]
    fn test_quota_exceeded_display() {
        let err = StowError::QuotaExceeded {
            required: 500,
            available: 100,
            limit: 1000,
        };
        assert_eq!(
            err.to_string(),
            "storage limit exceeded: 500 bytes required, 100 of 1000 available"
        );
    }

    #[test]
    fn test_metadata_deletion_display() {
        let id = Uuid::nil();
        let err = StowError::MetadataDeletion {
            id,
            message: "disk I/O error".to_string(),
        };
        assert!(err.to_string().contains("disk I/O error"));
        assert!(err.to_string().contains(&id.to_string()));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: StowError = io_err.into();
        assert!(matches!(err, StowError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_sqlx_error_conversion() {
        let err: StowError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, StowError::Database(_)));
    }

    #[test]
    fn test_result_alias() {
        fn sample_ok() -> Result<i32> {
            Ok(42)
        }

        fn sample_err() -> Result<i32> {
            Err(StowError::Blob("bucket offline".to_string()))
        }

        assert_eq!(sample_ok().unwrap(), 42);
        assert!(sample_err().is_err());
    }
}
