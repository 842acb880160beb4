//! 分发服务错误类型
//!
//! 定义输入校验、载荷验证、传输和聚合等场景的错误分类，
//! 便于上层根据错误类型决定重试或丢弃策略。

use thiserror::Error;

use crate::types::{PayloadField, RecipientFailure};

/// 传输层错误，由 Deliverer 实现返回
///
/// 核心不做重试，重试是 Deliverer 自身的职责。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{detail}")]
pub struct TransportError {
    pub detail: String,
}

impl TransportError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }

    pub fn deadline_exceeded() -> Self {
        Self::new("投递超过截止时间")
    }

    pub fn cancelled() -> Self {
        Self::new("投递已取消")
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("输入无效: {0}")]
    InvalidInput(String),

    #[error("载荷验证失败: recipient={recipient_id}, 缺少字段={field}")]
    Validation {
        recipient_id: String,
        field: PayloadField,
    },

    #[error("传输失败: {0}")]
    Transport(#[from] TransportError),

    #[error("{} 个接收人投递失败", failures.len())]
    Aggregate { failures: Vec<RecipientFailure> },

    #[error("广播在分发完成前被取消")]
    Cancelled,

    #[error("内部错误: {0}")]
    Internal(String),

    #[error(transparent)]
    Shared(#[from] notif_shared::error::SharedError),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, DispatchError>;

impl DispatchError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::Aggregate { .. } => "AGGREGATE_ERROR",
            Self::Cancelled => "CANCELLED",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Shared(e) => e.code(),
        }
    }

    /// 是否为可重试错误
    ///
    /// 验证失败和输入错误重试无意义；传输类错误交由调用方决定。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Aggregate { .. } | Self::Cancelled
        )
    }
}
