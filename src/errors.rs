use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("DUPLICATE_NAME: {0}")]
    DuplicateName(String),
    #[error("MOVE_INTO_DESCENDANT: cannot move '{0}' into itself or one of its descendants")]
    MoveIntoDescendant(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("VALIDATION: {0}")]
    Validation(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl From<std::io::Error> for VaultError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<serde_yaml::Error> for VaultError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::Validation(value.to_string())
    }
}

impl From<tokio::task::JoinError> for VaultError {
    fn from(value: tokio::task::JoinError) -> Self {
        Self::Internal(value.to_string())
    }
}

pub type VaultResult<T> = Result<T, VaultError>;
