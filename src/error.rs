use crate::types::RecordId;
use thiserror::Error;

/// Error types for the geometry store
#[derive(Debug, Error)]
pub enum GeoStoreError {
    /// Malformed ring, too few vertices, or a degenerate polygon
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),
    /// Unknown record id
    #[error("Record {0} not found")]
    NotFound(RecordId),
    /// Coordinate or radius outside its valid domain
    #[error("Value out of range: {0}")]
    OutOfRange(String),
    /// The index already holds an entry for this id
    #[error("Record {0} is already indexed")]
    DuplicateId(RecordId),
    /// Configuration values that cannot be used together
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    /// Store has been closed
    #[error("Store is closed")]
    StoreClosed,
    /// Lock acquisition failed
    #[error("Failed to acquire lock: {0}")]
    Lock(String),
    /// Serialization/deserialization error with context
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Unexpected end of file during deserialization
    #[error("Unexpected end of file")]
    UnexpectedEof,
    /// Invalid data format
    #[error("Invalid data format")]
    InvalidFormat,
    /// I/O error from persistence layer
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification used by transport layers to pick a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller sent something unusable (400-style)
    InvalidInput,
    /// The referenced record does not exist (404-style)
    NotFound,
    /// Everything else (500-style)
    Internal,
}

impl GeoStoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GeoStoreError::InvalidGeometry(_)
            | GeoStoreError::OutOfRange(_)
            | GeoStoreError::DuplicateId(_)
            | GeoStoreError::InvalidConfig(_) => ErrorKind::InvalidInput,
            GeoStoreError::NotFound(_) => ErrorKind::NotFound,
            _ => ErrorKind::Internal,
        }
    }
}

impl From<bincode::Error> for GeoStoreError {
    fn from(err: bincode::Error) -> Self {
        GeoStoreError::Serialization(err.to_string())
    }
}

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, GeoStoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_classification() {
        assert_eq!(
            GeoStoreError::InvalidGeometry("x".into()).kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(
            GeoStoreError::OutOfRange("radius".into()).kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(GeoStoreError::NotFound(7).kind(), ErrorKind::NotFound);
        assert_eq!(GeoStoreError::StoreClosed.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_error_display() {
        assert_eq!(GeoStoreError::NotFound(42).to_string(), "Record 42 not found");
        let io = GeoStoreError::from(std::io::Error::other("disk"));
        assert!(io.to_string().starts_with("I/O error"));
    }
}
