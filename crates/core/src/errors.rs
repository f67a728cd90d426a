use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 数据服务错误类型定义
#[derive(Debug, Error)]
pub enum DataServiceError {
    #[error("数据集未找到: {id}")]
    DatasetNotFound { id: i64 },

    #[error("作业未找到: {id}")]
    JobNotFound { id: i64 },

    #[error("任务未找到: {id}")]
    TaskNotFound { id: i64 },

    #[error("作业客户端未找到: {id}")]
    JobClientNotFound { id: i64 },

    #[error("Worker未找到: {address}")]
    WorkerNotFound { address: String },

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("资源已存在: {0}")]
    AlreadyExists(String),

    #[error("前置条件不满足: {0}")]
    FailedPrecondition(String),

    #[error("无效参数: {0}")]
    InvalidArgument(String),

    #[error("服务不可用: {0}")]
    Unavailable(String),

    #[error("内部错误: {0}")]
    Internal(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// 跨进程传输使用的错误码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotFound,
    AlreadyExists,
    FailedPrecondition,
    InvalidArgument,
    Unavailable,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::AlreadyExists => "ALREADY_EXISTS",
            ErrorCode::FailedPrecondition => "FAILED_PRECONDITION",
            ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            ErrorCode::Unavailable => "UNAVAILABLE",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DataServiceError {
    pub fn code(&self) -> ErrorCode {
        match self {
            DataServiceError::DatasetNotFound { .. }
            | DataServiceError::JobNotFound { .. }
            | DataServiceError::TaskNotFound { .. }
            | DataServiceError::JobClientNotFound { .. }
            | DataServiceError::WorkerNotFound { .. }
            | DataServiceError::NotFound(_) => ErrorCode::NotFound,
            DataServiceError::AlreadyExists(_) => ErrorCode::AlreadyExists,
            DataServiceError::FailedPrecondition(_) => ErrorCode::FailedPrecondition,
            DataServiceError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            DataServiceError::Unavailable(_) => ErrorCode::Unavailable,
            DataServiceError::Internal(_)
            | DataServiceError::Io(_)
            | DataServiceError::Serialization(_) => ErrorCode::Internal,
        }
    }

    /// 根据远端返回的错误码重建错误
    pub fn from_code(code: ErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            ErrorCode::NotFound => DataServiceError::NotFound(message),
            ErrorCode::AlreadyExists => DataServiceError::AlreadyExists(message),
            ErrorCode::FailedPrecondition => DataServiceError::FailedPrecondition(message),
            ErrorCode::InvalidArgument => DataServiceError::InvalidArgument(message),
            ErrorCode::Unavailable => DataServiceError::Unavailable(message),
            ErrorCode::Internal => DataServiceError::Internal(message),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.code() == ErrorCode::NotFound
    }

    pub fn is_already_exists(&self) -> bool {
        self.code() == ErrorCode::AlreadyExists
    }

    pub fn is_unavailable(&self) -> bool {
        self.code() == ErrorCode::Unavailable
    }
}

/// 统一的Result类型
pub type DataServiceResult<T> = std::result::Result<T, DataServiceError>;
