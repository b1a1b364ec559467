use database::DatabaseError;
use serde::Serialize;
use storage::StorageError;
use thiserror::Error;

/// Who is at fault for a failure, as seen by a caller of the control surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    CallerInput,
    NotFound,
    Internal,
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Backup file not found: {0}")]
    ArchiveNotFound(String),

    #[error("Archive is not a readable zip file: {0}")]
    CorruptArchive(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Archive error: {0}")]
    Archive(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("Remote storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Schedule error: {0}")]
    Schedule(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl EngineError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        EngineError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            EngineError::ArchiveNotFound(_)
            | EngineError::CorruptArchive(_)
            | EngineError::InvalidRequest(_) => ErrorClass::CallerInput,
            EngineError::Storage(StorageError::NotFound(_)) => ErrorClass::NotFound,
            EngineError::Storage(StorageError::InvalidName(_)) => ErrorClass::CallerInput,
            _ => ErrorClass::Internal,
        }
    }
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(err: tokio::task::JoinError) -> Self {
        EngineError::Task(err.to_string())
    }
}

impl From<zip::result::ZipError> for EngineError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::InvalidArchive(_) | zip::result::ZipError::UnsupportedArchive(_) => {
                EngineError::CorruptArchive(err.to_string())
            }
            other => EngineError::Archive(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_are_classified() {
        assert_eq!(
            EngineError::ArchiveNotFound("x.zip".into()).class(),
            ErrorClass::CallerInput
        );
        assert_eq!(
            EngineError::Storage(StorageError::NotFound("x".into())).class(),
            ErrorClass::NotFound
        );
        assert_eq!(
            EngineError::Archive("disk full".into()).class(),
            ErrorClass::Internal
        );
    }
}
