//! 扇出执行器
//!
//! 提供通用的 scatter-gather 原语：每个输入启动一个独立任务，
//! 结果写入与输入下标对齐的槽位，所有任务结束后（屏障）才返回。
//! 物化/验证阶段与逐人投递阶段共用这一原语。
//!
//! ## 并发约束
//!
//! - 槽位数量等于输入数量，每个任务只拥有自己的下标，不存在共享追加
//! - 可选的并发上限通过信号量在创建任务前获取许可
//! - 取消只在任务开始时检查，已开始的任务会运行至结束

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use crate::error::{DispatchError, Result};
use crate::materializer::Materializer;
use crate::types::{MaterializedPayload, PayloadField, Recipient, Template, ValidationOutcome};
use crate::validator::Validator;

/// 执行限制
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionLimits {
    /// 同时运行的任务上限，None 表示不限制
    pub max_concurrency: Option<usize>,
    /// 单次调用的总时限
    pub timeout: Option<Duration>,
}

impl ExecutionLimits {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = Some(max);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// 单次调用的执行范围
///
/// 每次广播调用独立创建，信号量、截止时间和取消令牌都不跨调用共享。
#[derive(Debug, Clone)]
pub struct ExecutionScope {
    limiter: Option<Arc<Semaphore>>,
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl ExecutionScope {
    pub fn new(limits: &ExecutionLimits, cancel: CancellationToken) -> Self {
        Self {
            limiter: limits
                .max_concurrency
                .map(|max| Arc::new(Semaphore::new(max.max(1)))),
            deadline: limits.timeout.map(|t| Instant::now() + t),
            cancel,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// 截止时间已过或已被取消
    pub fn is_expired(&self) -> bool {
        is_expired(&self.cancel, self.deadline)
    }
}

fn is_expired(cancel: &CancellationToken, deadline: Option<Instant>) -> bool {
    cancel.is_cancelled() || deadline.is_some_and(|d| Instant::now() >= d)
}

/// 单个任务的槽位结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot<T> {
    /// 任务运行完成
    Done(T),
    /// 任务开始时已被取消，未执行
    Skipped,
    /// 任务 panic
    Panicked(String),
}

impl<T> Slot<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }
}

/// 通用 scatter-gather
///
/// 按输入顺序为每个元素启动一个任务，等待全部任务结束后返回与输入一一对齐的槽位。
/// `work` 在调度循环中同步调用以构造 future，future 本身在独立任务中执行。
pub async fn scatter_gather<I, T, F, Fut>(
    scope: &ExecutionScope,
    inputs: Vec<I>,
    work: F,
) -> Vec<Slot<T>>
where
    F: Fn(usize, I) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let mut handles = Vec::with_capacity(inputs.len());

    for (index, input) in inputs.into_iter().enumerate() {
        // 信号量从不关闭，获取失败时按无限制处理
        let permit = match &scope.limiter {
            Some(limiter) => limiter.clone().acquire_owned().await.ok(),
            None => None,
        };
        let cancel = scope.cancel.clone();
        let deadline = scope.deadline;
        let task = work(index, input);

        handles.push(tokio::spawn(async move {
            let _permit = permit;
            if is_expired(&cancel, deadline) {
                return None;
            }
            Some(task.await)
        }));
    }

    // 屏障：按下标顺序等待所有任务
    join_all(handles)
        .await
        .into_iter()
        .map(|joined| match joined {
            Ok(Some(value)) => Slot::Done(value),
            Ok(None) => Slot::Skipped,
            Err(e) => Slot::Panicked(e.to_string()),
        })
        .collect()
}

/// 通过验证的载荷（保留输入下标）
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedPayload {
    pub index: usize,
    pub recipient_id: Option<String>,
    pub payload: MaterializedPayload,
}

/// 验证失败记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub index: usize,
    pub recipient_id: Option<String>,
    pub field: PayloadField,
}

/// 扇出结果：有效载荷与验证失败，均按输入顺序排列
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FanOutOutput {
    pub valid: Vec<IndexedPayload>,
    pub failures: Vec<ValidationFailure>,
}

impl FanOutOutput {
    pub fn total(&self) -> usize {
        self.valid.len() + self.failures.len()
    }

    pub fn all_invalid(&self) -> bool {
        self.valid.is_empty() && !self.failures.is_empty()
    }
}

/// 单个扇出任务的结果
enum FanOutSlot {
    Valid(MaterializedPayload),
    Invalid(PayloadField),
}

/// 扇出执行器
///
/// 对每个接收人并发执行物化与验证，屏障之后按原顺序划分结果。
#[derive(Clone)]
pub struct FanOutExecutor {
    materializer: Arc<dyn Materializer>,
    validator: Arc<dyn Validator>,
}

impl FanOutExecutor {
    pub fn new(materializer: Arc<dyn Materializer>, validator: Arc<dyn Validator>) -> Self {
        Self {
            materializer,
            validator,
        }
    }

    /// 为每个接收人物化并验证载荷
    ///
    /// 有任务因取消或超过截止时间而未执行时返回 `Cancelled`；
    /// 屏障之后才到期的情况交由投递阶段按接收人记录。
    #[instrument(skip_all, fields(recipient_count = recipients.len()))]
    pub async fn dispatch(
        &self,
        scope: &ExecutionScope,
        template: Arc<Template>,
        recipients: &[Recipient],
    ) -> Result<FanOutOutput> {
        let slots = scatter_gather(scope, recipients.to_vec(), |_, recipient| {
            let template = template.clone();
            let materializer = self.materializer.clone();
            let validator = self.validator.clone();
            async move {
                let payload = materializer.materialize(&template, &recipient);
                match validator.validate(&payload) {
                    ValidationOutcome::Ok => FanOutSlot::Valid(payload),
                    ValidationOutcome::MissingField(field) => FanOutSlot::Invalid(field),
                }
            }
        })
        .await;

        let mut output = FanOutOutput::default();
        let mut skipped = 0usize;

        for (index, (slot, recipient)) in slots.into_iter().zip(recipients).enumerate() {
            let recipient_id = Some(recipient.id.clone());
            match slot {
                Slot::Done(FanOutSlot::Valid(payload)) => output.valid.push(IndexedPayload {
                    index,
                    recipient_id,
                    payload,
                }),
                Slot::Done(FanOutSlot::Invalid(field)) => {
                    debug!(index, recipient_id = %recipient.id, %field, "载荷验证失败");
                    output.failures.push(ValidationFailure {
                        index,
                        recipient_id,
                        field,
                    });
                }
                Slot::Skipped => skipped += 1,
                Slot::Panicked(reason) => {
                    error!(index, recipient_id = %recipient.id, %reason, "物化任务异常");
                    return Err(DispatchError::Internal(format!(
                        "接收人 {} 的物化任务异常: {}",
                        recipient.id, reason
                    )));
                }
            }
        }

        if skipped > 0 {
            warn!(skipped, "扇出阶段被取消");
            return Err(DispatchError::Cancelled);
        }

        debug!(
            valid = output.valid.len(),
            invalid = output.failures.len(),
            "扇出完成"
        );

        Ok(output)
    }

    /// 不归属接收人的单载荷扇出
    pub fn dispatch_unattributed(&self, template: &Template) -> FanOutOutput {
        let payload = self.materializer.materialize_unattributed(template);
        let mut output = FanOutOutput::default();

        match self.validator.validate(&payload) {
            ValidationOutcome::Ok => output.valid.push(IndexedPayload {
                index: 0,
                recipient_id: None,
                payload,
            }),
            ValidationOutcome::MissingField(field) => output.failures.push(ValidationFailure {
                index: 0,
                recipient_id: None,
                field,
            }),
        }

        output
    }
}
