//! 通知类型定义
//!
//! 定义模板、接收人、物化载荷以及广播结果等数据结构。

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use notif_shared::config::{DeliveryMode, EmptyRecipientPolicy};

/// 通知模板
///
/// 与渠道无关的通知内容，同一次广播的所有接收人共享。
/// 传入广播调用后视为只读。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Template {
    /// 通知类型标签
    #[serde(rename = "type")]
    pub kind: String,
    pub icon: String,
    pub path: String,
    /// 通知正文，对分发引擎不透明
    pub content: Option<serde_json::Value>,
    pub color: String,
    pub is_read: bool,
    pub msg_type: String,
    pub channel: String,
    pub ecosystem_id: String,
}

impl Template {
    pub fn new(kind: impl Into<String>, content: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            content: Some(content),
            ..Default::default()
        }
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = icon.into();
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }

    pub fn with_msg_type(mut self, msg_type: impl Into<String>) -> Self {
        self.msg_type = msg_type.into();
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    pub fn with_ecosystem_id(mut self, ecosystem_id: impl Into<String>) -> Self {
        self.ecosystem_id = ecosystem_id.into();
        self
    }

    pub fn mark_read(mut self, is_read: bool) -> Self {
        self.is_read = is_read;
        self
    }
}

/// 接收人
///
/// 个性化载荷所需的身份信息，只有 id 必填。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    #[serde(rename = "user_id", alias = "id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl Recipient {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }
}

/// 载荷形态
///
/// 单条发送与广播派生的载荷各自声明不同的必填字段集合。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadShape {
    #[default]
    Single,
    Broadcast,
}

/// 物化载荷
///
/// 模板字段叠加单个接收人的身份信息。序列化格式即 webhook 的请求体。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaterializedPayload {
    #[serde(default)]
    pub user_id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub content: Option<serde_json::Value>,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub msg_type: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub ecosystem_id: String,
    #[serde(skip)]
    pub shape: PayloadShape,
}

impl MaterializedPayload {
    /// 接收人标识，空字符串视为不归属任何接收人
    pub fn recipient_id(&self) -> Option<&str> {
        if self.user_id.is_empty() {
            None
        } else {
            Some(&self.user_id)
        }
    }
}

/// 可声明为必填的载荷字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadField {
    UserId,
    #[serde(rename = "type")]
    Type,
    Icon,
    Path,
    Content,
    Color,
    MsgType,
    Channel,
    EcosystemId,
    Name,
    Email,
    Phone,
}

impl PayloadField {
    /// 字段在载荷序列化格式中的名称
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserId => "user_id",
            Self::Type => "type",
            Self::Icon => "icon",
            Self::Path => "path",
            Self::Content => "content",
            Self::Color => "color",
            Self::MsgType => "msg_type",
            Self::Channel => "channel",
            Self::EcosystemId => "ecosystem_id",
            Self::Name => "name",
            Self::Email => "email",
            Self::Phone => "phone",
        }
    }

    /// 字段在给定载荷中是否缺失
    ///
    /// 空白字符串、None 以及 JSON null 都视为缺失。
    pub fn is_missing_in(&self, payload: &MaterializedPayload) -> bool {
        fn blank(value: &str) -> bool {
            value.trim().is_empty()
        }
        fn blank_opt(value: &Option<String>) -> bool {
            value.as_deref().is_none_or(blank)
        }

        match self {
            Self::UserId => blank(&payload.user_id),
            Self::Type => blank(&payload.kind),
            Self::Icon => blank(&payload.icon),
            Self::Path => blank(&payload.path),
            Self::Content => payload
                .content
                .as_ref()
                .is_none_or(serde_json::Value::is_null),
            Self::Color => blank(&payload.color),
            Self::MsgType => blank(&payload.msg_type),
            Self::Channel => blank(&payload.channel),
            Self::EcosystemId => blank(&payload.ecosystem_id),
            Self::Name => blank_opt(&payload.name),
            Self::Email => blank_opt(&payload.email),
            Self::Phone => blank_opt(&payload.phone),
        }
    }
}

impl fmt::Display for PayloadField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 验证结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationOutcome {
    Ok,
    MissingField(PayloadField),
}

impl ValidationOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// 投递结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Ok,
    TransportError(String),
}

impl DeliveryOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl From<Result<(), crate::error::TransportError>> for DeliveryOutcome {
    fn from(result: Result<(), crate::error::TransportError>) -> Self {
        match result {
            Ok(()) => Self::Ok,
            Err(e) => Self::TransportError(e.detail),
        }
    }
}

/// 单个接收人的失败原因
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    ValidationFailure { field: PayloadField },
    TransportFailure { detail: String },
}

/// 结果中的一条失败记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientFailure {
    /// 接收人在输入序列中的下标
    pub index: usize,
    /// None 表示不归属任何接收人（单载荷模式）
    pub recipient_id: Option<String>,
    pub reason: FailureReason,
}

impl RecipientFailure {
    pub fn is_transport(&self) -> bool {
        matches!(self.reason, FailureReason::TransportFailure { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self.reason, FailureReason::ValidationFailure { .. })
    }
}

/// 广播整体状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastStatus {
    Success,
    PartialFailure,
    Failed,
}

impl BroadcastStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::PartialFailure => "partial_failure",
            Self::Failed => "failed",
        }
    }
}

/// 广播发送结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastResult {
    pub broadcast_id: String,
    pub mode: DeliveryMode,
    /// 参与本次广播的接收人数量
    pub attempted: usize,
    /// 投递成功的接收人数量
    pub succeeded: usize,
    /// 按输入顺序排列的失败记录
    pub failures: Vec<RecipientFailure>,
    pub status: BroadcastStatus,
    pub duration_ms: u64,
    pub finished_at: DateTime<Utc>,
}

impl BroadcastResult {
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    pub fn is_success(&self) -> bool {
        self.status == BroadcastStatus::Success
    }

    pub fn is_partial_failure(&self) -> bool {
        self.status == BroadcastStatus::PartialFailure
    }

    pub fn validation_failures(&self) -> impl Iterator<Item = &RecipientFailure> {
        self.failures.iter().filter(|f| f.is_validation())
    }

    pub fn transport_failures(&self) -> impl Iterator<Item = &RecipientFailure> {
        self.failures.iter().filter(|f| f.is_transport())
    }

    /// 若存在传输失败，汇总为 `DispatchError::Aggregate`
    pub fn into_transport_result(self) -> crate::error::Result<Self> {
        let failures: Vec<RecipientFailure> = self.transport_failures().cloned().collect();
        if failures.is_empty() {
            Ok(self)
        } else {
            Err(crate::error::DispatchError::Aggregate { failures })
        }
    }
}

/// 广播请求
///
/// 命令行与上游调用方使用的请求格式，投递模式缺省时使用配置值。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BroadcastRequest {
    pub template: Template,
    #[serde(default)]
    pub recipients: Vec<Recipient>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<DeliveryMode>,
}

/// 规范化手机号为 62 开头的国际格式
///
/// - `08xxxx` -> `628xxxx`
/// - `+62xxxx` -> `62xxxx`
/// - `62xxxx` 保持不变
///
/// 其他前缀返回 None。
pub fn normalize_phone(phone: &str) -> Option<String> {
    let phone = phone.trim();
    if phone.len() < 3 {
        return None;
    }
    if let Some(rest) = phone.strip_prefix('0') {
        if rest.starts_with('8') {
            return Some(format!("62{}", rest));
        }
        return None;
    }
    if let Some(rest) = phone.strip_prefix('+') {
        return rest.starts_with("62").then(|| rest.to_string());
    }
    phone.starts_with("62").then(|| phone.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_template_builder() {
        let template = Template::new("info", json!("hello"))
            .with_icon("bell.png")
            .with_path("/inbox")
            .with_color("#ff0000")
            .with_channel("bell")
            .mark_read(true);

        assert_eq!(template.kind, "info");
        assert_eq!(template.icon, "bell.png");
        assert_eq!(template.path, "/inbox");
        assert_eq!(template.content, Some(json!("hello")));
        assert!(template.is_read);
    }

    #[test]
    fn test_template_deserialize_missing_fields_default_to_empty() {
        let template: Template =
            serde_json::from_value(json!({"type": "info", "content": "hello"})).unwrap();
        assert_eq!(template.kind, "info");
        assert!(template.icon.is_empty());
        assert!(template.path.is_empty());
    }

    #[test]
    fn test_recipient_accepts_id_alias() {
        let a: Recipient = serde_json::from_value(json!({"id": "u1", "name": ""})).unwrap();
        let b: Recipient = serde_json::from_value(json!({"user_id": "u1", "name": ""})).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.name.as_deref(), Some(""));
    }

    #[test]
    fn test_payload_serializes_wire_names() {
        let payload = MaterializedPayload {
            user_id: "u1".to_string(),
            kind: "info".to_string(),
            content: Some(json!({"title": "hi"})),
            ..Default::default()
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["user_id"], "u1");
        assert_eq!(value["type"], "info");
        assert!(value.get("shape").is_none());
        assert!(value.get("email").is_none());
    }

    #[test]
    fn test_field_missing_checks() {
        let mut payload = MaterializedPayload {
            user_id: "u1".to_string(),
            kind: "  ".to_string(),
            content: Some(serde_json::Value::Null),
            email: Some(String::new()),
            ..Default::default()
        };

        assert!(!PayloadField::UserId.is_missing_in(&payload));
        assert!(PayloadField::Type.is_missing_in(&payload));
        assert!(PayloadField::Content.is_missing_in(&payload));
        assert!(PayloadField::Email.is_missing_in(&payload));
        assert!(PayloadField::Phone.is_missing_in(&payload));

        payload.content = Some(json!(""));
        // 非 null 的 JSON 值即视为存在
        assert!(!PayloadField::Content.is_missing_in(&payload));
    }

    #[test]
    fn test_result_helpers() {
        let result = BroadcastResult {
            broadcast_id: "b-1".to_string(),
            mode: DeliveryMode::PerRecipient,
            attempted: 3,
            succeeded: 1,
            failures: vec![
                RecipientFailure {
                    index: 0,
                    recipient_id: Some("u1".to_string()),
                    reason: FailureReason::ValidationFailure {
                        field: PayloadField::Icon,
                    },
                },
                RecipientFailure {
                    index: 2,
                    recipient_id: Some("u3".to_string()),
                    reason: FailureReason::TransportFailure {
                        detail: "timeout".to_string(),
                    },
                },
            ],
            status: BroadcastStatus::PartialFailure,
            duration_ms: 5,
            finished_at: Utc::now(),
        };

        assert!(result.is_partial_failure());
        assert_eq!(result.failure_count(), 2);
        assert_eq!(result.validation_failures().count(), 1);
        assert_eq!(result.transport_failures().count(), 1);

        match result.into_transport_result() {
            Err(crate::error::DispatchError::Aggregate { failures }) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].recipient_id.as_deref(), Some("u3"));
            }
            other => panic!("expected aggregate error, got {other:?}"),
        }
    }

    #[test]
    fn test_failure_reason_serialization() {
        let reason = FailureReason::ValidationFailure {
            field: PayloadField::Type,
        };
        let value = serde_json::to_value(&reason).unwrap();
        assert_eq!(value, json!({"kind": "validation_failure", "field": "type"}));
    }

    #[test]
    fn test_broadcast_request_deserialize() {
        let request: BroadcastRequest = serde_json::from_value(json!({
            "template": {"type": "promo", "icon": "gift.png", "path": "/promo", "content": {"id": 7}},
            "recipients": [{"user_id": "u1"}, {"id": "u2", "phone": "0812"}],
            "mode": "per_recipient"
        }))
        .unwrap();

        assert_eq!(request.template.kind, "promo");
        assert_eq!(request.recipients.len(), 2);
        assert_eq!(request.recipients[1].id, "u2");
        assert_eq!(request.mode, Some(DeliveryMode::PerRecipient));
    }

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone("08123456789").as_deref(), Some("628123456789"));
        assert_eq!(normalize_phone("+628123456789").as_deref(), Some("628123456789"));
        assert_eq!(normalize_phone("628123456789").as_deref(), Some("628123456789"));
        assert_eq!(normalize_phone("0212345678"), None);
        assert_eq!(normalize_phone("+18005551234"), None);
        assert_eq!(normalize_phone("12"), None);
    }
}
