//! 投递阶段
//!
//! 把通过验证的载荷交给投递器。两种模式：
//!
//! - **Bulk**: 一次 `send_bulk` 调用，整批成功或整批失败
//! - **PerRecipient**: 每个载荷一个独立任务调用 `send`，结果写入与下标对齐的槽位，
//!   单个失败不影响其他接收人
//!
//! 每次投递调用都受截止时间与取消信号约束，超时或取消统一记为传输错误。

use std::future::Future;
use std::sync::Arc;

use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use crate::channels::{DeliveryContext, Deliverer};
use crate::error::TransportError;
use crate::fanout::{ExecutionScope, IndexedPayload, Slot, scatter_gather};
use crate::types::{DeliveryMode, DeliveryOutcome, MaterializedPayload};

/// 单个接收人的投递结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientDelivery {
    pub index: usize,
    pub recipient_id: Option<String>,
    pub outcome: DeliveryOutcome,
}

/// 投递阶段报告
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryReport {
    /// 没有可投递的载荷，投递器未被调用
    Skipped,
    /// 批量投递：所有目标共享同一个结果
    Bulk {
        targets: Vec<(usize, Option<String>)>,
        outcome: DeliveryOutcome,
    },
    /// 逐人投递，按输入下标排序
    PerRecipient(Vec<RecipientDelivery>),
}

impl DeliveryReport {
    /// 投递成功的接收人数量
    pub fn delivered_count(&self) -> usize {
        match self {
            Self::Skipped => 0,
            Self::Bulk { targets, outcome } => {
                if outcome.is_ok() {
                    targets.len()
                } else {
                    0
                }
            }
            Self::PerRecipient(deliveries) => {
                deliveries.iter().filter(|d| d.outcome.is_ok()).count()
            }
        }
    }
}

/// 用截止时间和取消信号约束一次投递调用
pub(crate) async fn guarded<F>(
    deadline: Option<Instant>,
    cancel: CancellationToken,
    call: F,
) -> Result<(), TransportError>
where
    F: Future<Output = Result<(), TransportError>>,
{
    let bounded = async {
        match deadline {
            Some(deadline) => timeout_at(deadline, call)
                .await
                .unwrap_or_else(|_| Err(TransportError::deadline_exceeded())),
            None => call.await,
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransportError::cancelled()),
        result = bounded => result,
    }
}

/// 作用域失效的原因
fn expiry_error(scope: &ExecutionScope) -> TransportError {
    if scope.cancel_token().is_cancelled() {
        TransportError::cancelled()
    } else {
        TransportError::deadline_exceeded()
    }
}

/// 投递阶段
#[derive(Clone)]
pub struct DeliveryStage {
    deliverer: Arc<dyn Deliverer>,
}

impl DeliveryStage {
    pub fn new(deliverer: Arc<dyn Deliverer>) -> Self {
        Self { deliverer }
    }

    #[instrument(skip_all, fields(broadcast_id = %broadcast_id, mode = ?mode, count = valid.len()))]
    pub async fn deliver(
        &self,
        scope: &ExecutionScope,
        mode: DeliveryMode,
        broadcast_id: &str,
        valid: Vec<IndexedPayload>,
    ) -> DeliveryReport {
        if valid.is_empty() {
            debug!("没有有效载荷，跳过投递");
            return DeliveryReport::Skipped;
        }

        let ctx = DeliveryContext::new(broadcast_id)
            .with_deadline(scope.deadline())
            .with_cancel(scope.cancel_token().child_token());

        match mode {
            DeliveryMode::Bulk => self.deliver_bulk(scope, ctx, valid).await,
            DeliveryMode::PerRecipient => self.deliver_each(scope, ctx, valid).await,
        }
    }

    async fn deliver_bulk(
        &self,
        scope: &ExecutionScope,
        ctx: DeliveryContext,
        valid: Vec<IndexedPayload>,
    ) -> DeliveryReport {
        let (targets, payloads): (Vec<_>, Vec<MaterializedPayload>) = valid
            .into_iter()
            .map(|p| ((p.index, p.recipient_id), p.payload))
            .unzip();

        let result = if scope.is_expired() {
            Err(expiry_error(scope))
        } else {
            guarded(
                ctx.deadline,
                ctx.cancel.clone(),
                self.deliverer.send_bulk(&payloads, &ctx),
            )
            .await
        };

        if let Err(e) = &result {
            warn!(count = targets.len(), error = %e, "批量投递失败");
        }

        DeliveryReport::Bulk {
            targets,
            outcome: result.into(),
        }
    }

    async fn deliver_each(
        &self,
        scope: &ExecutionScope,
        ctx: DeliveryContext,
        valid: Vec<IndexedPayload>,
    ) -> DeliveryReport {
        let targets: Vec<(usize, Option<String>)> = valid
            .iter()
            .map(|p| (p.index, p.recipient_id.clone()))
            .collect();
        let payloads: Vec<MaterializedPayload> = valid.into_iter().map(|p| p.payload).collect();

        let slots = scatter_gather(scope, payloads, |_, payload| {
            let deliverer = self.deliverer.clone();
            let ctx = ctx.clone();
            async move {
                guarded(
                    ctx.deadline,
                    ctx.cancel.clone(),
                    deliverer.send(&payload, &ctx),
                )
                .await
            }
        })
        .await;

        let deliveries = slots
            .into_iter()
            .zip(targets)
            .map(|(slot, (index, recipient_id))| {
                let outcome = match slot {
                    Slot::Done(result) => DeliveryOutcome::from(result),
                    Slot::Skipped => DeliveryOutcome::TransportError(expiry_error(scope).detail),
                    Slot::Panicked(reason) => {
                        error!(index, ?recipient_id, %reason, "投递任务异常");
                        DeliveryOutcome::TransportError(format!("投递任务异常: {}", reason))
                    }
                };
                RecipientDelivery {
                    index,
                    recipient_id,
                    outcome,
                }
            })
            .collect();

        DeliveryReport::PerRecipient(deliveries)
    }
}
