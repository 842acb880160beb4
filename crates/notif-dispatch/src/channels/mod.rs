//! 投递渠道实现
//!
//! 定义投递器 trait 并提供各种渠道的具体实现。
//!
//! ## 支持的渠道
//!
//! - **Webhook**: 通过 HTTP POST 推送到通知网关（单条与批量接口）
//! - **InMemory**: 内存记录，用于测试、压测与演练（dry-run）

pub mod memory;
pub mod webhook;

pub use memory::InMemoryDeliverer;
pub use webhook::WebhookDeliverer;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::types::MaterializedPayload;

/// 渠道类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Webhook,
    Smtp,
    BulkInsert,
    InMemory,
}

/// 投递上下文
///
/// 把本次调用的截止时间与取消信号传递给投递器，
/// 实现方应据此约束网络或数据库调用的耗时。
#[derive(Debug, Clone)]
pub struct DeliveryContext {
    pub broadcast_id: String,
    pub deadline: Option<Instant>,
    pub cancel: CancellationToken,
}

impl DeliveryContext {
    pub fn new(broadcast_id: impl Into<String>) -> Self {
        Self {
            broadcast_id: broadcast_id.into(),
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// 距离截止时间的剩余时长，未设置截止时间时返回 None
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }
}

/// 投递器 trait
///
/// 所有渠道都需要实现此 trait，提供统一的单条与批量发送接口。
/// 实现应当是无状态的（或内部同步），便于并发调用。
/// 重试策略由实现自身负责，分发引擎不会重试。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Deliverer: Send + Sync {
    /// 渠道类型标识
    fn channel(&self) -> ChannelKind;

    /// 发送单条载荷
    async fn send(
        &self,
        payload: &MaterializedPayload,
        ctx: &DeliveryContext,
    ) -> Result<(), TransportError>;

    /// 批量发送载荷，整批成功或整批失败
    async fn send_bulk(
        &self,
        payloads: &[MaterializedPayload],
        ctx: &DeliveryContext,
    ) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_remaining() {
        let ctx = DeliveryContext::new("b-1");
        assert!(ctx.remaining().is_none());

        let ctx = ctx.with_deadline(Some(Instant::now() + Duration::from_secs(5)));
        let remaining = ctx.remaining().unwrap();
        assert!(remaining <= Duration::from_secs(5));
        assert!(remaining > Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_context_remaining_saturates_after_deadline() {
        let ctx = DeliveryContext::new("b-1").with_deadline(Some(Instant::now()));
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }
}
