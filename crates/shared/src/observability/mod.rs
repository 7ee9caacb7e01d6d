//! 统一可观测性模块
//!
//! 提供日志、追踪与 Prometheus 指标的统一初始化。
//! 两个服务都通过 `init` 单一入口配置，保证指标命名和日志字段一致。

pub mod metrics;
pub mod tracing;

use ::tracing::info;
use anyhow::Result;
use serde::Deserialize;

/// 可观测性配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// 服务名称，作为追踪资源和日志的来源标识
    pub service_name: String,

    /// OpenTelemetry OTLP 端点，为空时不导出 span
    pub otlp_endpoint: Option<String>,

    /// `/metrics` 与 `/health` 的监听端口
    pub metrics_port: u16,

    /// 日志级别，RUST_LOG 存在时以其为准
    pub log_level: String,

    /// 是否输出 JSON 格式日志
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown-service".to_string(),
            otlp_endpoint: None,
            metrics_port: 9090,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl ObservabilityConfig {
    /// 未显式配置服务名时使用进程名
    pub fn with_service_name(mut self, service_name: &str) -> Self {
        if self.service_name.is_empty() || self.service_name == "unknown-service" {
            self.service_name = service_name.to_string();
        }
        self
    }
}

/// 可观测性资源守卫
///
/// drop 时关闭追踪 provider 并刷新未导出的 span，指标服务随进程退出。
pub struct ObservabilityGuard {
    _metrics: metrics::MetricsHandle,
    _tracing: tracing::TracingGuard,
}

impl Drop for ObservabilityGuard {
    fn drop(&mut self) {
        info!("Shutting down observability...");
    }
}

/// 统一初始化可观测性
///
/// 先初始化日志与追踪，使指标服务的启动日志也能被采集。
pub async fn init(config: &ObservabilityConfig) -> Result<ObservabilityGuard> {
    let tracing_guard = tracing::init(config)?;

    info!(
        service = %config.service_name,
        metrics_port = config.metrics_port,
        otlp_endpoint = ?config.otlp_endpoint,
        "Observability initialized"
    );

    let metrics_handle = metrics::init(config).await?;

    Ok(ObservabilityGuard {
        _metrics: metrics_handle,
        _tracing: tracing_guard,
    })
}
