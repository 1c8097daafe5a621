use thiserror::Error;

/// 编排器错误类型定义
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("工作单元未找到: {id}")]
    WorkNotFound { id: String },

    #[error("进程未找到: {id}")]
    ProcessNotFound { id: String },

    #[error("工作单元已存在: {id}")]
    DuplicateWork { id: String },

    #[error("报告格式错误: {0}")]
    MalformedReport(String),

    #[error("持久化失败: {0}")]
    Persistence(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl OrchestratorError {
    pub fn work_not_found(id: impl ToString) -> Self {
        Self::WorkNotFound { id: id.to_string() }
    }
    pub fn process_not_found(id: impl ToString) -> Self {
        Self::ProcessNotFound { id: id.to_string() }
    }
    pub fn duplicate_work(id: impl ToString) -> Self {
        Self::DuplicateWork { id: id.to_string() }
    }
    pub fn malformed<S: Into<String>>(msg: S) -> Self {
        Self::MalformedReport(msg.into())
    }
    pub fn persistence<S: Into<String>>(msg: S) -> Self {
        Self::Persistence(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// 下一轮协调或清理时可能自行恢复的错误
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrchestratorError::WorkNotFound { .. }
                | OrchestratorError::Persistence(_)
                | OrchestratorError::Io(_)
        )
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        OrchestratorError::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for OrchestratorError {
    fn from(err: config::ConfigError) -> Self {
        OrchestratorError::Configuration(err.to_string())
    }
}

/// 统一的Result类型
pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(OrchestratorError::work_not_found(7).is_retryable());
        assert!(OrchestratorError::persistence("disk full").is_retryable());
        assert!(!OrchestratorError::malformed("bad map").is_retryable());
        assert!(!OrchestratorError::config_error("zero interval").is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = OrchestratorError::work_not_found(42);
        assert_eq!(err.to_string(), "工作单元未找到: 42");

        let err: OrchestratorError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, OrchestratorError::Serialization(_)));
    }
}
