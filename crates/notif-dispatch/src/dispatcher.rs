//! 广播分发器
//!
//! 对外提供单条发送与广播发送两个入口，串联扇出、投递与聚合三个阶段。
//!
//! ## 调用流程
//!
//! 1. 接收人为空时按策略拒绝或物化单条不归属的载荷
//! 2. 并发物化与验证，屏障之后按原顺序划分有效载荷与验证失败
//! 3. 有效载荷按投递模式交给投递器（全部无效时跳过）
//! 4. 按接收人下标聚合失败记录并判定整体状态
//!
//! 分发器本身不持有跨调用的可变状态，同一实例可被并发调用。

use std::sync::Arc;
use std::time::Instant;

use notif_shared::config::DispatchConfig;
use notif_shared::observability::metrics::{record_broadcast, record_single_send};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::aggregator::{BroadcastMeta, aggregate};
use crate::channels::{DeliveryContext, Deliverer};
use crate::delivery::{DeliveryReport, DeliveryStage, guarded};
use crate::error::{DispatchError, Result};
use crate::fanout::{ExecutionLimits, ExecutionScope, FanOutExecutor, FanOutOutput};
use crate::materializer::{Materializer, OverlayMaterializer};
use crate::phase::BroadcastPhase;
use crate::types::{
    BroadcastResult, BroadcastStatus, DeliveryMode, EmptyRecipientPolicy, MaterializedPayload,
    Recipient, Template, ValidationOutcome,
};
use crate::validator::Validator;

/// 单次广播调用的选项
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastOptions {
    pub mode: DeliveryMode,
    pub empty_recipients: EmptyRecipientPolicy,
    pub limits: ExecutionLimits,
}

impl BroadcastOptions {
    pub fn new(mode: DeliveryMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    pub fn with_empty_recipients(mut self, policy: EmptyRecipientPolicy) -> Self {
        self.empty_recipients = policy;
        self
    }

    pub fn with_limits(mut self, limits: ExecutionLimits) -> Self {
        self.limits = limits;
        self
    }
}

impl From<&DispatchConfig> for BroadcastOptions {
    fn from(config: &DispatchConfig) -> Self {
        let mut limits = ExecutionLimits::unbounded();
        if let Some(max) = config.max_concurrency {
            limits = limits.with_max_concurrency(max);
        }
        if let Some(ms) = config.deadline_ms {
            limits = limits.with_timeout(std::time::Duration::from_millis(ms));
        }

        Self {
            mode: config.delivery_mode,
            empty_recipients: config.empty_recipients,
            limits,
        }
    }
}

/// 广播分发器
#[derive(Clone)]
pub struct BroadcastDispatcher {
    materializer: Arc<dyn Materializer>,
    validator: Arc<dyn Validator>,
    deliverer: Arc<dyn Deliverer>,
    options: BroadcastOptions,
}

impl BroadcastDispatcher {
    /// 使用默认物化器和默认选项创建
    pub fn new(deliverer: Arc<dyn Deliverer>, validator: Arc<dyn Validator>) -> Self {
        Self {
            materializer: Arc::new(OverlayMaterializer::new()),
            validator,
            deliverer,
            options: BroadcastOptions::default(),
        }
    }

    /// 根据分发配置创建
    pub fn from_config(
        config: &DispatchConfig,
        deliverer: Arc<dyn Deliverer>,
        validator: Arc<dyn Validator>,
    ) -> Self {
        let materializer =
            OverlayMaterializer::new().with_phone_normalization(config.normalize_phone);

        Self::new(deliverer, validator)
            .with_materializer(Arc::new(materializer))
            .with_options(BroadcastOptions::from(config))
    }

    pub fn with_materializer(mut self, materializer: Arc<dyn Materializer>) -> Self {
        self.materializer = materializer;
        self
    }

    pub fn with_options(mut self, options: BroadcastOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &BroadcastOptions {
        &self.options
    }

    /// 验证并发送单条载荷
    ///
    /// 验证失败时投递器不会被调用。
    #[instrument(skip_all, fields(user_id = %payload.user_id))]
    pub async fn send_one(&self, payload: &MaterializedPayload) -> Result<()> {
        let start = Instant::now();

        if let ValidationOutcome::MissingField(field) = self.validator.validate(payload) {
            record_single_send("validation_failed");
            warn!(%field, "单条载荷验证失败");
            return Err(DispatchError::Validation {
                recipient_id: payload.user_id.clone(),
                field,
            });
        }

        let scope = ExecutionScope::new(&self.options.limits, CancellationToken::new());
        let ctx = DeliveryContext::new(Uuid::now_v7().to_string())
            .with_deadline(scope.deadline())
            .with_cancel(scope.cancel_token().child_token());

        let result = guarded(
            ctx.deadline,
            ctx.cancel.clone(),
            self.deliverer.send(payload, &ctx),
        )
        .await;

        let duration_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(()) => {
                record_single_send("success");
                info!(duration_ms, "单条发送完成");
            }
            Err(e) => {
                record_single_send("failed");
                error!(duration_ms, error = %e, "单条发送失败");
            }
        }

        result.map_err(DispatchError::from)
    }

    /// 使用分发器默认选项广播
    pub async fn send_broadcast(
        &self,
        template: &Template,
        recipients: &[Recipient],
    ) -> Result<BroadcastResult> {
        self.send_broadcast_with(template, recipients, &self.options, CancellationToken::new())
            .await
    }

    /// 使用指定选项与取消令牌广播
    ///
    /// 接收人为空且策略为 `Reject` 时返回 `InvalidInput`，不会调用投递器；
    /// 扇出屏障完成前被取消返回 `Cancelled`。
    #[instrument(
        skip_all,
        fields(recipient_count = recipients.len(), mode = options.mode.as_str())
    )]
    pub async fn send_broadcast_with(
        &self,
        template: &Template,
        recipients: &[Recipient],
        options: &BroadcastOptions,
        cancel: CancellationToken,
    ) -> Result<BroadcastResult> {
        let broadcast_id = Uuid::now_v7().to_string();
        let mut phase = BroadcastPhase::Init;

        let result = self
            .run_broadcast(&broadcast_id, &mut phase, template, recipients, options, cancel)
            .await;

        match &result {
            Ok(result) => {
                self.log_result(result);
                record_broadcast(
                    result.mode.as_str(),
                    result.status.as_str(),
                    result.attempted,
                    result.failure_count(),
                    result.duration_ms as f64 / 1000.0,
                );
            }
            Err(e) => {
                warn!(
                    broadcast_id = %broadcast_id,
                    phase = %phase,
                    code = e.code(),
                    error = %e,
                    "广播中止"
                );
                phase.abort();
            }
        }

        result
    }

    async fn run_broadcast(
        &self,
        broadcast_id: &str,
        phase: &mut BroadcastPhase,
        template: &Template,
        recipients: &[Recipient],
        options: &BroadcastOptions,
        cancel: CancellationToken,
    ) -> Result<BroadcastResult> {
        let started_at = Instant::now();

        if recipients.is_empty() && options.empty_recipients == EmptyRecipientPolicy::Reject {
            return Err(DispatchError::InvalidInput("接收人列表为空".to_string()));
        }

        let scope = ExecutionScope::new(&options.limits, cancel);
        let executor = FanOutExecutor::new(self.materializer.clone(), self.validator.clone());

        phase.advance(BroadcastPhase::FanningOut)?;
        let (fanout, attempted) = if recipients.is_empty() {
            if scope.is_expired() {
                return Err(DispatchError::Cancelled);
            }
            (executor.dispatch_unattributed(template), 1)
        } else {
            let output = executor
                .dispatch(&scope, Arc::new(template.clone()), recipients)
                .await?;
            (output, recipients.len())
        };

        let FanOutOutput { valid, failures } = fanout;

        let report = if valid.is_empty() {
            phase.advance(BroadcastPhase::Aggregating)?;
            DeliveryReport::Skipped
        } else {
            phase.advance(BroadcastPhase::Delivering)?;
            let report = DeliveryStage::new(self.deliverer.clone())
                .deliver(&scope, options.mode, broadcast_id, valid)
                .await;
            phase.advance(BroadcastPhase::Aggregating)?;
            report
        };

        let meta = BroadcastMeta {
            broadcast_id: broadcast_id.to_string(),
            mode: options.mode,
            attempted,
            started_at,
        };
        let result = aggregate(meta, failures, report);
        phase.advance(BroadcastPhase::Done(result.status))?;

        Ok(result)
    }

    /// 记录广播结果
    fn log_result(&self, result: &BroadcastResult) {
        let failure_count = result.failure_count();

        match result.status {
            BroadcastStatus::Success => info!(
                broadcast_id = %result.broadcast_id,
                succeeded = result.succeeded,
                attempted = result.attempted,
                duration_ms = result.duration_ms,
                "广播发送完成（全部成功）"
            ),
            BroadcastStatus::PartialFailure => warn!(
                broadcast_id = %result.broadcast_id,
                succeeded = result.succeeded,
                failure_count,
                attempted = result.attempted,
                duration_ms = result.duration_ms,
                "广播发送完成（部分成功）"
            ),
            BroadcastStatus::Failed => error!(
                broadcast_id = %result.broadcast_id,
                failure_count,
                attempted = result.attempted,
                duration_ms = result.duration_ms,
                "广播发送完成（全部失败）"
            ),
        }
    }
}
