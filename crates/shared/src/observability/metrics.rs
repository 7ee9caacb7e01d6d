//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 收集指标，
//! 通过独立端口上的 axum 服务暴露 `/metrics` 与 `/health`。
//! 未安装 recorder 时（如单元测试）所有记录函数都是空操作。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;
use crate::lag::{PartitionLag, TopicPartition};

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 安装 Prometheus recorder 并启动指标 HTTP 服务
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    describe_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

fn describe_metrics(service_name: &str) {
    metrics::describe_counter!(
        "redis_ops_total",
        "Redis operations by operation and status"
    );
    metrics::describe_gauge!(
        "kafka_consumer_lag",
        "Messages between the partition end offset and the committed offset"
    );
    metrics::describe_gauge!("kafka_partition_end_offset", "Partition end offset");
    metrics::describe_gauge!("kafka_committed_offset", "Committed offset of the group");
    metrics::describe_gauge!(
        "kafka_lag_timestamp",
        "Unix time of the last lag sample for the partition"
    );
    metrics::describe_counter!(
        "saga_messages_total",
        "Consumed messages by topic and outcome"
    );
    metrics::describe_counter!(
        "rate_resolutions_total",
        "Exchange rate resolutions by source"
    );
    metrics::describe_counter!(
        "rate_api_requests_total",
        "Exchange rate API requests by status"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

// ============================================================================
// 记录函数
// ============================================================================

/// 记录一次缓存操作
#[inline]
pub fn record_cache_op(operation: &'static str, success: bool) {
    let status = if success { "success" } else { "fail" };
    metrics::counter!("redis_ops_total", "operation" => operation, "status" => status)
        .increment(1);
}

/// 记录一条消息的最终处理结果（committed / discarded / redelivered）
#[inline]
pub fn record_saga_message(topic: &str, outcome: &str) {
    metrics::counter!(
        "saga_messages_total",
        "topic" => topic.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// 记录一次分区延迟采样
pub fn record_partition_lag(sample: &PartitionLag) {
    let topic = sample.topic.clone();
    let partition = sample.partition.to_string();

    metrics::gauge!(
        "kafka_consumer_lag",
        "topic" => topic.clone(),
        "partition" => partition.clone()
    )
    .set(sample.lag as f64);
    metrics::gauge!(
        "kafka_partition_end_offset",
        "topic" => topic.clone(),
        "partition" => partition.clone()
    )
    .set(sample.end_offset as f64);
    metrics::gauge!(
        "kafka_committed_offset",
        "topic" => topic.clone(),
        "partition" => partition.clone()
    )
    .set(sample.committed_offset as f64);
    metrics::gauge!("kafka_lag_timestamp", "topic" => topic, "partition" => partition)
        .set(chrono::Utc::now().timestamp() as f64);
}

/// 分区被回收后把延迟相关 gauge 归零
pub fn clear_partition_lag(tp: &TopicPartition) {
    let topic = tp.topic.clone();
    let partition = tp.partition.to_string();

    for name in [
        "kafka_consumer_lag",
        "kafka_partition_end_offset",
        "kafka_committed_offset",
    ] {
        metrics::gauge!(name, "topic" => topic.clone(), "partition" => partition.clone()).set(0.0);
    }
}

/// 记录汇率来源（cache / api / unavailable）
#[inline]
pub fn record_rate_resolution(source: &'static str) {
    metrics::counter!("rate_resolutions_total", "source" => source).increment(1);
}

/// 记录一次汇率 API 请求的结果
#[inline]
pub fn record_rate_api_request(status: &'static str) {
    metrics::counter!("rate_api_requests_total", "status" => status).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lag::TopicPartition;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_cache_op("get", true);
        record_saga_message("order.created", "committed");
        record_rate_resolution("cache");
        record_rate_api_request("success");
        record_partition_lag(&PartitionLag::compute(
            &TopicPartition::new("order.created", 0),
            10,
            Some(4),
        ));
    }
}
