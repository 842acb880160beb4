//! Webhook 投递渠道
//!
//! 把物化载荷以 JSON 形式 POST 到通知网关：单条载荷发往 bell 接口，
//! 批量载荷以数组形式发往 bell/bulk 接口。请求携带 `x-api-key` 头。
//!
//! 单次请求的超时取配置超时与调用剩余时间中的较小值，
//! 取消信号到达时立即放弃等待中的请求。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, error, warn};

use notif_shared::config::WebhookConfig;

use super::{ChannelKind, DeliveryContext, Deliverer};
use crate::error::{DispatchError, Result, TransportError};
use crate::types::MaterializedPayload;

const API_KEY_HEADER: &str = "x-api-key";

/// Webhook 投递器
pub struct WebhookDeliverer {
    client: Client,
    single_url: String,
    bulk_url: String,
    api_key: String,
    timeout: Duration,
}

impl WebhookDeliverer {
    pub fn new(config: &WebhookConfig) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| DispatchError::Internal(format!("HTTP 客户端初始化失败: {}", e)))?;

        Ok(Self {
            client,
            single_url: config.single_url(),
            bulk_url: config.bulk_url(),
            api_key: config.api_key.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
        })
    }

    pub fn single_url(&self) -> &str {
        &self.single_url
    }

    pub fn bulk_url(&self) -> &str {
        &self.bulk_url
    }

    /// 本次请求可用的超时；剩余时间耗尽时返回 None
    fn request_timeout(&self, remaining: Option<Duration>) -> Option<Duration> {
        match remaining {
            Some(remaining) if remaining.is_zero() => None,
            Some(remaining) => Some(remaining.min(self.timeout)),
            None => Some(self.timeout),
        }
    }

    async fn post<B>(
        &self,
        url: &str,
        body: &B,
        ctx: &DeliveryContext,
    ) -> std::result::Result<(), TransportError>
    where
        B: Serialize + ?Sized,
    {
        let timeout = self
            .request_timeout(ctx.remaining())
            .ok_or_else(TransportError::deadline_exceeded)?;

        let request = self
            .client
            .post(url)
            .header(API_KEY_HEADER, &self.api_key)
            .timeout(timeout)
            .json(body);

        let response = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(TransportError::cancelled()),
            sent = request.send() => sent.map_err(|e| {
                if e.is_timeout() {
                    TransportError::new(format!("请求超时: {}", url))
                } else {
                    TransportError::new(format!("请求失败: {}", e))
                }
            })?,
        };

        let status = response.status();
        if status.is_success() {
            debug!(broadcast_id = %ctx.broadcast_id, url, %status, "Webhook 投递成功");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() {
            warn!(broadcast_id = %ctx.broadcast_id, url, %status, "Webhook 网关返回服务端错误");
        } else {
            error!(broadcast_id = %ctx.broadcast_id, url, %status, "Webhook 投递被拒绝");
        }

        Err(TransportError::new(format!(
            "HTTP {} - {}",
            status,
            body.chars().take(200).collect::<String>()
        )))
    }
}

#[async_trait]
impl Deliverer for WebhookDeliverer {
    fn channel(&self) -> ChannelKind {
        ChannelKind::Webhook
    }

    async fn send(
        &self,
        payload: &MaterializedPayload,
        ctx: &DeliveryContext,
    ) -> std::result::Result<(), TransportError> {
        self.post(&self.single_url, payload, ctx).await
    }

    async fn send_bulk(
        &self,
        payloads: &[MaterializedPayload],
        ctx: &DeliveryContext,
    ) -> std::result::Result<(), TransportError> {
        self.post(&self.bulk_url, payloads, ctx).await
    }
}
