//! 内存投递渠道
//!
//! 把投递的载荷记录在内存中，不产生任何网络调用。
//! 支持按接收人或批量调用注入失败，以及模拟网络延迟，
//! 用于测试、压测和命令行的演练模式。

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::{ChannelKind, DeliveryContext, Deliverer};
use crate::error::TransportError;
use crate::types::MaterializedPayload;

/// 内存投递器
#[derive(Debug, Default)]
pub struct InMemoryDeliverer {
    delivered: Mutex<Vec<MaterializedPayload>>,
    send_calls: AtomicUsize,
    bulk_calls: AtomicUsize,
    failing_recipients: HashSet<String>,
    bulk_failure: Option<String>,
    latency: Option<Duration>,
    discard: bool,
}

impl InMemoryDeliverer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 指定接收人的单条发送返回传输错误
    pub fn failing_for<I, S>(mut self, recipient_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failing_recipients
            .extend(recipient_ids.into_iter().map(Into::into));
        self
    }

    /// 批量发送返回给定的传输错误
    pub fn failing_bulk(mut self, detail: impl Into<String>) -> Self {
        self.bulk_failure = Some(detail.into());
        self
    }

    /// 每次调用前模拟的网络延迟
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// 只计数不保存载荷，用于长时间压测
    pub fn discarding(mut self) -> Self {
        self.discard = true;
        self
    }

    /// 已成功投递的载荷（按投递完成顺序）
    pub fn delivered(&self) -> Vec<MaterializedPayload> {
        self.delivered.lock().clone()
    }

    pub fn delivered_count(&self) -> usize {
        self.delivered.lock().len()
    }

    pub fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    pub fn bulk_calls(&self) -> usize {
        self.bulk_calls.load(Ordering::SeqCst)
    }

    /// send 与 send_bulk 的调用总数
    pub fn total_calls(&self) -> usize {
        self.send_calls() + self.bulk_calls()
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl Deliverer for InMemoryDeliverer {
    fn channel(&self) -> ChannelKind {
        ChannelKind::InMemory
    }

    async fn send(
        &self,
        payload: &MaterializedPayload,
        ctx: &DeliveryContext,
    ) -> Result<(), TransportError> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        if self.failing_recipients.contains(&payload.user_id) {
            return Err(TransportError::new(format!(
                "模拟投递失败: user_id={}",
                payload.user_id
            )));
        }

        debug!(
            broadcast_id = %ctx.broadcast_id,
            user_id = %payload.user_id,
            "内存投递单条载荷"
        );
        if !self.discard {
            self.delivered.lock().push(payload.clone());
        }
        Ok(())
    }

    async fn send_bulk(
        &self,
        payloads: &[MaterializedPayload],
        ctx: &DeliveryContext,
    ) -> Result<(), TransportError> {
        self.bulk_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        if let Some(detail) = &self.bulk_failure {
            return Err(TransportError::new(detail.clone()));
        }

        debug!(
            broadcast_id = %ctx.broadcast_id,
            count = payloads.len(),
            "内存投递批量载荷"
        );
        if !self.discard {
            self.delivered.lock().extend_from_slice(payloads);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(user_id: &str) -> MaterializedPayload {
        MaterializedPayload {
            user_id: user_id.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_records_single_sends() {
        let deliverer = InMemoryDeliverer::new();
        let ctx = DeliveryContext::new("b-1");

        deliverer.send(&payload("u1"), &ctx).await.unwrap();
        deliverer.send(&payload("u2"), &ctx).await.unwrap();

        assert_eq!(deliverer.send_calls(), 2);
        assert_eq!(deliverer.bulk_calls(), 0);
        assert_eq!(deliverer.delivered_count(), 2);
    }

    #[tokio::test]
    async fn test_failing_recipient() {
        let deliverer = InMemoryDeliverer::new().failing_for(["u2"]);
        let ctx = DeliveryContext::new("b-1");

        assert!(deliverer.send(&payload("u1"), &ctx).await.is_ok());
        let err = deliverer.send(&payload("u2"), &ctx).await.unwrap_err();

        assert!(err.detail.contains("u2"));
        assert_eq!(deliverer.delivered_count(), 1);
        assert_eq!(deliverer.send_calls(), 2);
    }

    #[tokio::test]
    async fn test_bulk_failure_records_nothing() {
        let deliverer = InMemoryDeliverer::new().failing_bulk("gateway 503");
        let ctx = DeliveryContext::new("b-1");

        let err = deliverer
            .send_bulk(&[payload("u1"), payload("u2")], &ctx)
            .await
            .unwrap_err();

        assert_eq!(err.detail, "gateway 503");
        assert_eq!(deliverer.delivered_count(), 0);
        assert_eq!(deliverer.bulk_calls(), 1);
        assert_eq!(deliverer.channel(), ChannelKind::InMemory);
    }

    #[tokio::test]
    async fn test_discarding_counts_calls_only() {
        let deliverer = InMemoryDeliverer::new().discarding();
        let ctx = DeliveryContext::new("b-1");

        deliverer.send_bulk(&[payload("u1")], &ctx).await.unwrap();

        assert_eq!(deliverer.bulk_calls(), 1);
        assert_eq!(deliverer.delivered_count(), 0);
    }
}
