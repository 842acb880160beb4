//! 统一错误处理模块
//!
//! 定义基础设施层共享的错误类型，使用 thiserror 提供良好的错误信息。

use thiserror::Error;

/// 基础设施错误类型
#[derive(Debug, Error)]
pub enum SharedError {
    #[error("配置加载失败: {0}")]
    Config(#[from] config::ConfigError),

    #[error("可观测性初始化失败: {0}")]
    Observability(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, SharedError>;

impl SharedError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::Observability(_) => "OBSERVABILITY_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let err = SharedError::Observability("subscriber already set".to_string());
        assert_eq!(err.code(), "OBSERVABILITY_ERROR");
        assert_eq!(
            err.to_string(),
            "可观测性初始化失败: subscriber already set"
        );
    }

    #[test]
    fn test_config_error_conversion() {
        let err: SharedError = config::ConfigError::Message("bad value".to_string()).into();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }
}
