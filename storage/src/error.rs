use std::fmt;

/// Error type for storage operations
#[derive(Debug)]
pub enum StorageError {
    /// Error returned by a provider API (Dropbox, S3)
    Api(String),
    /// AWS SDK error
    Aws(String),
    /// Authentication error
    Authentication(String),
    /// Configuration error
    Configuration(String),
    /// Archive name rejected before reaching the provider
    InvalidName(String),
    /// I/O error
    Io(std::io::Error),
    /// Object not found
    NotFound(String),
    /// Permission denied
    PermissionDenied(String),
    /// Request error
    Request(String),
    /// Serialization/deserialization error
    Serialization(String),
    /// Unexpected error
    Unexpected(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }

    /// Short label used when reporting
    pub fn kind(&self) -> &'static str {
        match self {
            StorageError::Api(_) => "api",
            StorageError::Aws(_) => "aws",
            StorageError::Authentication(_) => "authentication",
            StorageError::Configuration(_) => "configuration",
            StorageError::InvalidName(_) => "invalid_name",
            StorageError::Io(_) => "io",
            StorageError::NotFound(_) => "not_found",
            StorageError::PermissionDenied(_) => "permission_denied",
            StorageError::Request(_) => "request",
            StorageError::Serialization(_) => "serialization",
            StorageError::Unexpected(_) => "unexpected",
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Api(msg) => write!(f, "Provider API error: {}", msg),
            StorageError::Aws(msg) => write!(f, "AWS SDK error: {}", msg),
            StorageError::Authentication(msg) => write!(f, "Authentication error: {}", msg),
            StorageError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            StorageError::InvalidName(msg) => write!(f, "Invalid archive name: {}", msg),
            StorageError::Io(err) => write!(f, "I/O error: {}", err),
            StorageError::NotFound(msg) => write!(f, "Not found: {}", msg),
            StorageError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
            StorageError::Request(msg) => write!(f, "Request error: {}", msg),
            StorageError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            StorageError::Unexpected(msg) => write!(f, "Unexpected error: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err)
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(err: reqwest::Error) -> Self {
        StorageError::Request(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
