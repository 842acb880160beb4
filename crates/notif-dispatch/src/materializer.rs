//! 载荷物化
//!
//! 把模板与接收人合并为物化载荷。物化是纯函数：不做 I/O，不读写共享状态，
//! 因此可以在并发任务中直接调用而无需加锁。

use crate::types::{MaterializedPayload, PayloadShape, Recipient, Template, normalize_phone};

/// 载荷物化器
#[cfg_attr(test, mockall::automock)]
pub trait Materializer: Send + Sync {
    /// 为单个接收人物化广播载荷
    fn materialize(&self, template: &Template, recipient: &Recipient) -> MaterializedPayload;

    /// 不归属任何接收人的单载荷物化（空接收人 + SinglePayload 策略）
    fn materialize_unattributed(&self, template: &Template) -> MaterializedPayload;
}

/// 默认物化器：模板字段上叠加接收人身份字段
#[derive(Debug, Clone, Default)]
pub struct OverlayMaterializer {
    normalize_phone: bool,
}

impl OverlayMaterializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 启用手机号规范化，无法规范化的号码原样保留
    pub fn with_phone_normalization(mut self, enabled: bool) -> Self {
        self.normalize_phone = enabled;
        self
    }

    fn from_template(template: &Template, shape: PayloadShape) -> MaterializedPayload {
        MaterializedPayload {
            user_id: String::new(),
            kind: template.kind.clone(),
            name: None,
            email: None,
            phone: None,
            icon: template.icon.clone(),
            path: template.path.clone(),
            content: template.content.clone(),
            color: template.color.clone(),
            is_read: template.is_read,
            msg_type: template.msg_type.clone(),
            channel: template.channel.clone(),
            ecosystem_id: template.ecosystem_id.clone(),
            shape,
        }
    }
}

impl Materializer for OverlayMaterializer {
    fn materialize(&self, template: &Template, recipient: &Recipient) -> MaterializedPayload {
        let mut payload = Self::from_template(template, PayloadShape::Broadcast);
        payload.user_id = recipient.id.clone();
        payload.name = recipient.name.clone();
        payload.email = recipient.email.clone();
        payload.phone = match (&recipient.phone, self.normalize_phone) {
            (Some(phone), true) => Some(normalize_phone(phone).unwrap_or_else(|| phone.clone())),
            (phone, _) => phone.clone(),
        };
        payload
    }

    fn materialize_unattributed(&self, template: &Template) -> MaterializedPayload {
        Self::from_template(template, PayloadShape::Single)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn template() -> Template {
        Template::new("info", json!({"title": "hello"}))
            .with_icon("bell.png")
            .with_path("/inbox")
            .with_ecosystem_id("eco-1")
    }

    #[test]
    fn test_materialize_overlays_identity() {
        let recipient = Recipient::new("u1")
            .with_name("Budi")
            .with_email("budi@example.com");

        let payload = OverlayMaterializer::new().materialize(&template(), &recipient);

        assert_eq!(payload.user_id, "u1");
        assert_eq!(payload.name.as_deref(), Some("Budi"));
        assert_eq!(payload.email.as_deref(), Some("budi@example.com"));
        assert_eq!(payload.kind, "info");
        assert_eq!(payload.icon, "bell.png");
        assert_eq!(payload.ecosystem_id, "eco-1");
        assert_eq!(payload.shape, PayloadShape::Broadcast);
    }

    #[test]
    fn test_materialize_does_not_touch_template() {
        let template = template();
        let before = template.clone();
        let _ = OverlayMaterializer::new().materialize(&template, &Recipient::new("u1"));
        assert_eq!(template, before);
    }

    #[test]
    fn test_materialize_unattributed() {
        let payload = OverlayMaterializer::new().materialize_unattributed(&template());

        assert!(payload.recipient_id().is_none());
        assert_eq!(payload.shape, PayloadShape::Single);
        assert_eq!(payload.path, "/inbox");
    }

    #[test]
    fn test_phone_normalization() {
        let materializer = OverlayMaterializer::new().with_phone_normalization(true);

        let payload = materializer.materialize(&template(), &Recipient::new("u1").with_phone("0812345678"));
        assert_eq!(payload.phone.as_deref(), Some("62812345678"));

        // 无法规范化时原样保留
        let payload = materializer.materialize(&template(), &Recipient::new("u2").with_phone("+1555"));
        assert_eq!(payload.phone.as_deref(), Some("+1555"));

        let payload = OverlayMaterializer::new()
            .materialize(&template(), &Recipient::new("u3").with_phone("0812345678"));
        assert_eq!(payload.phone.as_deref(), Some("0812345678"));
    }
}
