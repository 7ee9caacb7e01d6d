//! 消费延迟监控
//!
//! 周期性地对消费者当前分配到的每个分区采样 `end_offset` 与 `committed_offset`，
//! 计算 `lag = end_offset - committed_offset` 并以 gauge 形式导出。
//! 从未提交过偏移量的分区按 0 处理，此时上报的延迟等于 end_offset。
//! 再均衡后不再分配给本消费者的分区，其 gauge 归零，避免面板上残留冻结的积压。

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::observability::metrics;

/// topic + 分区
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.topic, self.partition)
    }
}

/// 偏移量只读查询接口
///
/// 生产实现基于与消费循环共享的 Kafka 消费者句柄，查询不会干扰消息拉取。
#[async_trait]
pub trait OffsetSource: Send + Sync {
    /// 当前分配给本消费者的分区，再均衡期间可能为空
    async fn assigned_partitions(&self) -> Result<Vec<TopicPartition>>;
    /// 分区最新可用偏移量（高水位）
    async fn end_offset(&self, tp: &TopicPartition) -> Result<i64>;
    /// 本消费组已提交的偏移量，从未提交时为 None
    async fn committed_offset(&self, tp: &TopicPartition) -> Result<Option<i64>>;
}

/// 单个分区的一次采样结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionLag {
    pub topic: String,
    pub partition: i32,
    pub end_offset: i64,
    /// 未提交时记为 0
    pub committed_offset: i64,
    pub lag: i64,
}

impl PartitionLag {
    pub fn compute(tp: &TopicPartition, end_offset: i64, committed_offset: Option<i64>) -> Self {
        let committed_offset = committed_offset.unwrap_or(0);
        let raw_lag = end_offset - committed_offset;
        if raw_lag < 0 {
            warn!(
                topic = %tp.topic,
                partition = tp.partition,
                end_offset,
                committed_offset,
                "已提交偏移量超过高水位，按 0 上报"
            );
        }
        Self {
            topic: tp.topic.clone(),
            partition: tp.partition,
            end_offset,
            committed_offset,
            lag: raw_lag.max(0),
        }
    }
}

/// 消费延迟监控器
pub struct LagMonitor {
    source: Arc<dyn OffsetSource>,
    interval: Duration,
    /// 上一轮采样时的分区分配
    assigned: Mutex<HashSet<TopicPartition>>,
}

impl LagMonitor {
    pub fn new(source: Arc<dyn OffsetSource>, interval: Duration) -> Self {
        Self {
            source,
            interval,
            assigned: Mutex::new(HashSet::new()),
        }
    }

    /// 执行一次采样并更新 gauge
    ///
    /// 单个分区查询失败只跳过该分区，分区列表查询失败则整轮失败。
    pub async fn sample(&self) -> Result<Vec<PartitionLag>> {
        let partitions = self.source.assigned_partitions().await?;
        for tp in self.forget_revoked(&partitions) {
            info!(partition = %tp, "分区已不再分配给本消费者，延迟指标归零");
            metrics::clear_partition_lag(&tp);
        }
        if partitions.is_empty() {
            debug!("尚未分配分区，跳过本轮延迟采样");
            return Ok(Vec::new());
        }

        let mut samples = Vec::with_capacity(partitions.len());
        for tp in &partitions {
            let end_offset = match self.source.end_offset(tp).await {
                Ok(offset) => offset,
                Err(e) => {
                    warn!(partition = %tp, error = %e, "查询高水位失败");
                    continue;
                }
            };
            let committed = match self.source.committed_offset(tp).await {
                Ok(offset) => offset,
                Err(e) => {
                    warn!(partition = %tp, error = %e, "查询已提交偏移量失败");
                    continue;
                }
            };

            let sample = PartitionLag::compute(tp, end_offset, committed);
            metrics::record_partition_lag(&sample);
            samples.push(sample);
        }

        Ok(samples)
    }

    /// 记录本轮分配，返回上一轮有而本轮没有的分区
    fn forget_revoked(&self, assigned: &[TopicPartition]) -> Vec<TopicPartition> {
        let current: HashSet<TopicPartition> = assigned.iter().cloned().collect();
        let mut previous = self.assigned.lock();
        let mut revoked: Vec<TopicPartition> = previous.difference(&current).cloned().collect();
        revoked.sort_by(|a, b| (&a.topic, a.partition).cmp(&(&b.topic, b.partition)));
        *previous = current;
        revoked
    }

    /// 后台循环，直到关闭信号变为 true
    ///
    /// 关闭信号只在两次采样之间检查，采样过程不会被中途打断。
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(interval_secs = self.interval.as_secs(), "消费延迟监控已启动");

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }

                _ = ticker.tick() => {
                    if let Err(e) = self.sample().await {
                        error!(error = %e, "消费延迟采样失败");
                    }
                }
            }
        }

        info!("消费延迟监控已停止");
    }
}
