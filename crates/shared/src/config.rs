//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。
//! 配置只在调用方显式执行 `AppConfig::load` 时读取，模块本身没有任何
//! 进程级的隐式初始化。

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;

/// 环境变量前缀（NOTIF_WEBHOOK__BASE_URL -> webhook.base_url）
pub const ENV_PREFIX: &str = "NOTIF";

/// 投递模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// 一次 send_bulk 调用，整批成功或整批失败
    #[default]
    Bulk,
    /// 每个有效载荷独立调用 send，失败按接收人归属
    PerRecipient,
}

impl DeliveryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bulk => "bulk",
            Self::PerRecipient => "per_recipient",
        }
    }
}

/// 接收人列表为空时的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyRecipientPolicy {
    /// 直接拒绝（InputError），不做任何物化
    #[default]
    Reject,
    /// 由模板直接物化一条不归属任何接收人的载荷
    SinglePayload,
}

/// 分发引擎配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub delivery_mode: DeliveryMode,
    pub empty_recipients: EmptyRecipientPolicy,
    /// 并发任务上限，None 表示不限制
    pub max_concurrency: Option<usize>,
    /// 单次广播的截止时间（毫秒）
    pub deadline_ms: Option<u64>,
    /// 是否在物化时规范化手机号
    pub normalize_phone: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            delivery_mode: DeliveryMode::Bulk,
            empty_recipients: EmptyRecipientPolicy::Reject,
            max_concurrency: Some(64),
            deadline_ms: Some(30_000),
            normalize_phone: false,
        }
    }
}

/// Webhook 投递配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub base_url: String,
    pub api_key: String,
    pub single_path: String,
    pub bulk_path: String,
    pub timeout_ms: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_key: String::new(),
            single_path: "/v4/notification-service/notifications/bell".to_string(),
            bulk_path: "/v4/notification-service/notifications/bell/bulk".to_string(),
            timeout_ms: 10_000,
        }
    }
}

impl WebhookConfig {
    pub fn single_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.single_path)
    }

    pub fn bulk_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.bulk_path)
    }
}

/// 可观测性配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// 日志输出格式：json（结构化）或 pretty（人类可读）
    pub log_format: String,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_port: 9090,
        }
    }
}

impl ObservabilityConfig {
    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub dispatch: DispatchConfig,
    pub webhook: WebhookConfig,
    pub observability: ObservabilityConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service_name: "notif-broadcast".to_string(),
            environment: "development".to_string(),
            dispatch: DispatchConfig::default(),
            webhook: WebhookConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（NOTIF_ 前缀，如 NOTIF_WEBHOOK__API_KEY -> webhook.api_key）
    pub fn load(service_name: &str) -> Result<Self> {
        let env = std::env::var("NOTIF_ENV").unwrap_or_else(|_| "development".to_string());
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        Self::load_from(service_name, &env, Path::new(&config_dir))
    }

    /// 从指定目录加载配置（便于测试时指定临时目录）
    pub fn load_from(service_name: &str, env: &str, config_dir: &Path) -> Result<Self> {
        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join(format!("{}.toml", env))).required(false))
            .add_source(
                File::from(config_dir.join(format!("{}.toml", service_name))).required(false),
            )
            // 双下划线分隔层级，单下划线保留在字段名中
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}
