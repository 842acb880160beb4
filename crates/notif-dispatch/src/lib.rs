//! 通知广播分发引擎
//!
//! 把一份通知模板扇出到一组接收人：并发物化并验证每个接收人的载荷，
//! 在屏障之后把有效载荷交给可插拔的投递器，最后按接收人聚合失败并返回结果。
//!
//! ## 核心功能
//!
//! - **单条发送**：验证后直接投递一条载荷
//! - **广播发送**：并发扇出、批量或逐人投递、按输入顺序聚合失败
//! - **部分失败容忍**：单个接收人失败不影响其他接收人
//! - **取消与截止时间**：扇出前取消直接中止，投递调用受截止时间约束
//!
//! ## 模块结构
//!
//! - `types`: 模板、接收人、载荷与结果类型
//! - `error`: 错误类型定义
//! - `materializer`: 载荷物化
//! - `validator`: 必填字段验证
//! - `fanout`: scatter-gather 原语与扇出执行器
//! - `delivery`: 投递阶段
//! - `aggregator`: 结果聚合
//! - `phase`: 调用阶段状态机
//! - `dispatcher`: 对外入口
//! - `channels`: 投递器 trait 与渠道实现

pub mod aggregator;
pub mod channels;
pub mod delivery;
pub mod dispatcher;
pub mod error;
pub mod fanout;
pub mod materializer;
pub mod phase;
pub mod types;
pub mod validator;

pub use channels::{ChannelKind, DeliveryContext, Deliverer, InMemoryDeliverer, WebhookDeliverer};
pub use dispatcher::{BroadcastDispatcher, BroadcastOptions};
pub use error::{DispatchError, Result, TransportError};
pub use fanout::{ExecutionLimits, ExecutionScope, FanOutExecutor, Slot, scatter_gather};
pub use materializer::{Materializer, OverlayMaterializer};
pub use types::{
    BroadcastRequest, BroadcastResult, BroadcastStatus, DeliveryMode, EmptyRecipientPolicy,
    FailureReason, MaterializedPayload, PayloadField, PayloadShape, Recipient, RecipientFailure,
    Template,
};
pub use validator::{RequiredFieldValidator, Validator};
