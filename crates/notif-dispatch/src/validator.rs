//! 载荷验证
//!
//! 每种载荷形态显式声明一组有序的必填字段，逐个直接判断空值，
//! 返回第一个缺失的字段。验证失败的载荷整体丢弃，不做部分修补。

use std::collections::HashMap;

use crate::types::{MaterializedPayload, PayloadField, PayloadShape, ValidationOutcome};

/// 载荷验证器
#[cfg_attr(test, mockall::automock)]
pub trait Validator: Send + Sync {
    fn validate(&self, payload: &MaterializedPayload) -> ValidationOutcome;
}

/// 基于声明式必填字段集合的验证器
#[derive(Debug, Clone, Default)]
pub struct RequiredFieldValidator {
    required: HashMap<PayloadShape, Vec<PayloadField>>,
}

impl RequiredFieldValidator {
    /// 空验证器：未声明字段的形态一律通过
    pub fn new() -> Self {
        Self::default()
    }

    /// 站内信（bell）载荷的必填字段
    ///
    /// 广播载荷必须归属某个用户；单条载荷不要求 `user_id`，
    /// 未归属接收人的单载荷同样适用。
    pub fn bell() -> Self {
        Self::new()
            .require(
                PayloadShape::Single,
                [
                    PayloadField::Type,
                    PayloadField::Icon,
                    PayloadField::Path,
                    PayloadField::Content,
                ],
            )
            .require(
                PayloadShape::Broadcast,
                [
                    PayloadField::UserId,
                    PayloadField::Type,
                    PayloadField::Icon,
                    PayloadField::Path,
                    PayloadField::Content,
                ],
            )
    }

    /// 为某个形态声明必填字段（按检查顺序）
    pub fn require(
        mut self,
        shape: PayloadShape,
        fields: impl IntoIterator<Item = PayloadField>,
    ) -> Self {
        self.required.insert(shape, fields.into_iter().collect());
        self
    }

    pub fn required_fields(&self, shape: PayloadShape) -> &[PayloadField] {
        self.required.get(&shape).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl Validator for RequiredFieldValidator {
    fn validate(&self, payload: &MaterializedPayload) -> ValidationOutcome {
        self.required_fields(payload.shape)
            .iter()
            .find(|field| field.is_missing_in(payload))
            .map_or(ValidationOutcome::Ok, |field| {
                ValidationOutcome::MissingField(*field)
            })
    }
}
