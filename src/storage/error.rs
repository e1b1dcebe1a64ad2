//! Filesystem error taxonomy / 文件系统错误类型

use thiserror::Error;

/// Result alias used by every filesystem operation / 文件系统操作结果
pub type Result<T> = std::result::Result<T, FsError>;

/// Errors surfaced to filesystem callers.
///
/// There is no not-found variant: `exists` turns a 404 into `false` and
/// deletes treat it as success.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FsError {
    /// Client absent or failed to construct, or the dispatcher lost the task.
    #[error("internal error: {0}")]
    Internal(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A backend call failed for a reason other than "not found".
    #[error("failed to {action}(endpoint={endpoint}, bucket={bucket}, key={key}): {message}")]
    Io {
        action: String,
        endpoint: String,
        bucket: String,
        key: String,
        message: String,
    },

    #[error("not supported: {0}")]
    NotSupported(String),
}

impl FsError {
    pub fn internal(msg: impl Into<String>) -> Self {
        FsError::Internal(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        FsError::InvalidArgument(msg.into())
    }

    pub fn not_supported(msg: impl Into<String>) -> Self {
        FsError::NotSupported(msg.into())
    }

    /// Key carried by an I/O error, if any / 获取出错的对象键
    pub fn key(&self) -> Option<&str> {
        match self {
            FsError::Io { key, .. } => Some(key),
            _ => None,
        }
    }

    pub fn is_io(&self) -> bool {
        matches!(self, FsError::Io { .. })
    }
}

/// Failure reported by the object-storage backend / 后端返回的错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct BackendError {
    /// HTTP-style response code, when the backend produced one
    pub code: Option<u16>,
    pub message: String,
}

impl BackendError {
    pub fn new(code: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn with_code(code: u16, message: impl Into<String>) -> Self {
        Self::new(Some(code), message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::with_code(404, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.code == Some(404)
    }
}
