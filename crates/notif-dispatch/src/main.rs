//! 通知广播命令行
//!
//! 从文件或标准输入读取广播请求（JSON），通过 webhook 投递，
//! 并把广播结果以 JSON 输出到标准输出。
//!
//! ```bash
//! # 从文件读取请求
//! notif-broadcast request.json
//!
//! # 演练：使用内存投递器，不发出网络请求
//! cat request.json | notif-broadcast --dry-run --mode per-recipient
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use notif_dispatch::{
    BroadcastDispatcher, BroadcastRequest, Deliverer, DeliveryMode, InMemoryDeliverer,
    RequiredFieldValidator, WebhookDeliverer,
};
use notif_shared::config::AppConfig;
use notif_shared::observability;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

const SERVICE_NAME: &str = "notif-broadcast";

/// 通知广播工具
#[derive(Parser, Debug)]
#[command(name = "notif-broadcast")]
#[command(version, about = "通知广播分发工具")]
struct Cli {
    /// 广播请求文件（JSON），缺省时从标准输入读取
    request: Option<PathBuf>,

    /// 演练模式：使用内存投递器
    #[arg(long)]
    dry_run: bool,

    /// 覆盖配置中的投递模式
    #[arg(short, long, value_enum)]
    mode: Option<ModeArg>,

    /// 配置目录（缺省读取 CONFIG_DIR 或 ./config）
    #[arg(long)]
    config_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Bulk,
    PerRecipient,
}

impl From<ModeArg> for DeliveryMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Bulk => DeliveryMode::Bulk,
            ModeArg::PerRecipient => DeliveryMode::PerRecipient,
        }
    }
}

async fn read_request(path: Option<&PathBuf>) -> anyhow::Result<BroadcastRequest> {
    let raw = match path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("读取请求文件失败: {}", path.display()))?,
        None => {
            let mut buf = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buf)
                .await
                .context("读取标准输入失败")?;
            buf
        }
    };

    serde_json::from_str(&raw).context("解析广播请求失败")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config_dir {
        Some(dir) => {
            let env = std::env::var("NOTIF_ENV").unwrap_or_else(|_| "development".to_string());
            AppConfig::load_from(SERVICE_NAME, &env, dir)?
        }
        None => AppConfig::load(SERVICE_NAME)?,
    };

    let _guard = observability::init(&config.service_name, &config.observability).await?;

    let request = read_request(cli.request.as_ref()).await?;
    if let Some(mode) = cli.mode.map(DeliveryMode::from).or(request.mode) {
        config.dispatch.delivery_mode = mode;
    }

    let deliverer: Arc<dyn Deliverer> = if cli.dry_run {
        info!("演练模式：使用内存投递器");
        Arc::new(InMemoryDeliverer::new())
    } else {
        if config.webhook.api_key.is_empty() {
            warn!("未配置 webhook api_key，请设置 NOTIF_WEBHOOK__API_KEY");
        }
        Arc::new(WebhookDeliverer::new(&config.webhook)?)
    };

    info!(
        environment = %config.environment,
        channel = ?deliverer.channel(),
        mode = config.dispatch.delivery_mode.as_str(),
        recipient_count = request.recipients.len(),
        "开始广播"
    );

    let dispatcher = BroadcastDispatcher::from_config(
        &config.dispatch,
        deliverer,
        Arc::new(RequiredFieldValidator::bell()),
    );

    let result = dispatcher
        .send_broadcast(&request.template, &request.recipients)
        .await?;

    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(())
}
