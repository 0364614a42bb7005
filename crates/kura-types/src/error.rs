//! The resource error taxonomy.

use thiserror::Error;

/// Result type for VFS operations.
pub type ResourceResult<T> = Result<T, ResourceError>;

/// Errors surfaced to VFS clients.
///
/// Errors are `Clone` so a single failure can be fanned out to every
/// requester of a batch; I/O causes are carried as strings for that reason.
#[derive(Debug, Clone, Error)]
pub enum ResourceError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("corrupt resource: {0}")]
    Corrupt(String),
    #[error("illegal write request: {0}")]
    IllegalWriteRequest(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("metadata extraction failed: {0}")]
    Extractor(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("compound failure ({} errors)", .0.len())]
    Compound(Vec<ResourceError>),
}

impl ResourceError {
    /// Fold a list of errors into one.
    ///
    /// `None` for an empty list, the error itself for a single entry, and
    /// a `Compound` otherwise.
    pub fn compound(mut errors: Vec<ResourceError>) -> Option<ResourceError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(ResourceError::Compound(errors)),
        }
    }
}

impl From<std::io::Error> for ResourceError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => ResourceError::NotFound(err.to_string()),
            _ => ResourceError::Io(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ResourceError {
    fn from(err: serde_json::Error) -> Self {
        ResourceError::Extractor(err.to_string())
    }
}
