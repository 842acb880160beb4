//! 广播调用的阶段状态机
//!
//! ```text
//! Init -> FanningOut -> Delivering -> Aggregating -> Done(status)
//!              |                          ^
//!              +----- (全部验证失败) -------+
//! ```
//!
//! 任意非终止阶段都可以进入 Aborted（输入错误、取消或内部错误）。
//! 每次调用恰好到达一个终止状态，FanningOut 不会被重新进入。

use std::fmt;

use tracing::trace;

use crate::error::{DispatchError, Result};
use crate::types::BroadcastStatus;

/// 广播阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastPhase {
    Init,
    FanningOut,
    Delivering,
    Aggregating,
    /// 正常结束，携带整体状态
    Done(BroadcastStatus),
    /// 以错误结束，没有广播结果
    Aborted,
}

impl fmt::Display for BroadcastPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::FanningOut => write!(f, "fanning_out"),
            Self::Delivering => write!(f, "delivering"),
            Self::Aggregating => write!(f, "aggregating"),
            Self::Done(status) => write!(f, "done({})", status.as_str()),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

impl BroadcastPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Aborted)
    }

    pub fn can_transition_to(&self, next: BroadcastPhase) -> bool {
        use BroadcastPhase::*;
        match (self, next) {
            (Init, FanningOut) => true,
            (FanningOut, Delivering) => true,
            (FanningOut, Aggregating) => true,
            (Delivering, Aggregating) => true,
            (Aggregating, Done(_)) => true,
            (current, Aborted) => !current.is_terminal(),
            _ => false,
        }
    }

    /// 迁移到下一阶段，非法迁移返回内部错误
    pub fn advance(&mut self, next: BroadcastPhase) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(DispatchError::Internal(format!(
                "非法的阶段迁移: {} -> {}",
                self, next
            )));
        }
        trace!(from = %self, to = %next, "广播阶段迁移");
        *self = next;
        Ok(())
    }

    /// 以错误结束当前调用；已处于终止状态时保持不变
    pub fn abort(&mut self) {
        if !self.is_terminal() {
            *self = Self::Aborted;
        }
    }
}
