use noties_core::SchemaError;
use noties_proto::ErrorCode;
use thiserror::Error;

/// The remote store could not be reached or refused the request.
///
/// Never fatal: callers downgrade the domain to offline and queue writes.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("remote store unreachable: {0}")]
    Unreachable(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("lease expired: {0}")]
    LeaseExpired(String),

    #[error("connection to remote store lost")]
    Disconnected,

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    pub fn from_code(code: ErrorCode, message: String) -> Self {
        match code {
            ErrorCode::Unavailable => TransportError::Unreachable(message),
            ErrorCode::PermissionDenied => TransportError::PermissionDenied(message),
            ErrorCode::ResourceExhausted => TransportError::QuotaExceeded(message),
            ErrorCode::LeaseExpired => TransportError::LeaseExpired(message),
            ErrorCode::NotFound | ErrorCode::InvalidArgument | ErrorCode::Internal => {
                TransportError::Protocol(format!("{code:?}: {message}"))
            }
        }
    }
}

/// Local durable storage failed. Best-effort: logged, never blocks a remote write.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("record encoding: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored path is invalid: {0}")]
    Path(#[from] noties_core::PathError),

    #[error("database lock poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Storage,
    ScopeMissing,
    Schema,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("no session scope set")]
    ScopeMissing,

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Transport(_) => ErrorKind::Transport,
            SyncError::Storage(_) => ErrorKind::Storage,
            SyncError::ScopeMissing => ErrorKind::ScopeMissing,
            SyncError::Schema(_) => ErrorKind::Schema,
        }
    }
}
