//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。
//! 未安装 recorder 时，记录函数为空操作。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// 已安装的 Prometheus recorder，用于渲染抓取结果
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// 指标导出服务句柄
///
/// Drop 时停止导出服务。
pub struct MetricsHandle {
    exporter: JoinHandle<()>,
    addr: SocketAddr,
}

impl MetricsHandle {
    /// 导出服务实际监听的地址
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for MetricsHandle {
    fn drop(&mut self) {
        self.exporter.abort();
    }
}

/// 安装 Prometheus recorder 并在指定端口启动导出服务
///
/// 导出服务提供 `/metrics`（抓取）与 `/health`（存活检查）两个端点。
pub async fn init(service_name: &str, port: u16) -> Result<MetricsHandle> {
    let recorder = PrometheusBuilder::new().install_recorder()?;
    let _ = PROMETHEUS_HANDLE.set(recorder.clone());

    describe_broadcast_metrics();
    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);

    let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await?;
    let addr = listener.local_addr()?;
    let exporter = tokio::spawn(serve_exporter(listener, recorder));
    info!(%addr, "指标导出服务已启动");

    Ok(MetricsHandle { exporter, addr })
}

/// 广播相关指标描述
fn describe_broadcast_metrics() {
    metrics::describe_counter!("broadcast_calls_total", "Total number of broadcast calls");
    metrics::describe_counter!(
        "broadcast_recipients_total",
        "Total number of recipients attempted"
    );
    metrics::describe_counter!(
        "broadcast_failures_total",
        "Total number of per-recipient failures"
    );
    metrics::describe_histogram!(
        "broadcast_duration_seconds",
        "Broadcast call duration in seconds"
    );
    metrics::describe_counter!("single_sends_total", "Total number of single sends");
}

async fn serve_exporter(listener: TcpListener, recorder: PrometheusHandle) {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(recorder.render())))
        .route("/health", get(|| std::future::ready("OK")));

    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "指标导出服务异常退出");
    }
}

/// 已安装的 recorder，未初始化时返回 None
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录一次广播调用
#[inline]
pub fn record_broadcast(
    mode: &str,
    status: &str,
    attempted: usize,
    failures: usize,
    duration_secs: f64,
) {
    metrics::counter!(
        "broadcast_calls_total",
        "mode" => mode.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    metrics::counter!("broadcast_recipients_total", "mode" => mode.to_string())
        .increment(attempted as u64);

    metrics::counter!("broadcast_failures_total", "mode" => mode.to_string())
        .increment(failures as u64);

    metrics::histogram!("broadcast_duration_seconds", "mode" => mode.to_string())
        .record(duration_secs);
}

/// 记录一次单条发送
#[inline]
pub fn record_single_send(status: &str) {
    metrics::counter!("single_sends_total", "status" => status.to_string()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_functions_do_not_panic() {
        record_broadcast("bulk", "success", 3, 0, 0.01);
        record_broadcast("per_recipient", "partial_failure", 5, 2, 0.2);
        record_single_send("success");
    }
}
