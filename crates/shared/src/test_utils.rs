//! 测试工具模块
//!
//! 提供无外部依赖的 Kafka / Redis 替身，供各服务的单元测试和集成测试使用。

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::cache::KeyValueCache;
use crate::error::{Result, SagaError};
use crate::events::{OrderCreatedEvent, OrderEvent};
use crate::kafka::{ConsumerMessage, EventPublisher, OffsetCommitter};
use crate::lag::{OffsetSource, TopicPartition};

// ==================== 内存缓存 ====================

/// 带过期时间的内存缓存
///
/// `set_unavailable(true)` 之后所有操作返回错误，用于模拟 Redis 宕机。
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
    unavailable: Mutex<bool>,
    writes: Mutex<u32>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock() = unavailable;
    }

    /// 成功写入次数
    pub fn write_count(&self) -> u32 {
        *self.writes.lock()
    }

    /// 直接读取（不经过可用性检查），用于断言
    pub fn peek(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .get(key)
            .filter(|(_, expires_at)| *expires_at > Instant::now())
            .map(|(value, _)| value.clone())
    }

    fn check_available(&self) -> Result<()> {
        if *self.unavailable.lock() {
            return Err(SagaError::ExternalService {
                service: "redis".to_string(),
                message: "模拟 Redis 不可用".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_available()?;
        Ok(self.peek(key))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.check_available()?;
        self.entries
            .lock()
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        *self.writes.lock() += 1;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_available()?;
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.check_available()
    }
}

// ==================== 记录型发布者 ====================

/// 记录所有发布请求的发布者
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<(String, String, OrderEvent)>>,
    failing: Mutex<bool>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// 让后续发布全部失败
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    /// 已发布的 (topic, key, event)
    pub fn published(&self) -> Vec<(String, String, OrderEvent)> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, topic: &str, event: &OrderEvent) -> Result<()> {
        if *self.failing.lock() {
            return Err(SagaError::Kafka("模拟 broker 不可达".to_string()));
        }
        self.published.lock().push((
            topic.to_string(),
            event.order_id().to_string(),
            event.clone(),
        ));
        Ok(())
    }
}

// ==================== 固定偏移量来源 ====================

/// 返回预设偏移量的 `OffsetSource`
#[derive(Debug, Default)]
pub struct StaticOffsetSource {
    partitions: Mutex<Vec<(TopicPartition, i64, Option<i64>)>>,
    failing: Mutex<bool>,
}

impl StaticOffsetSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_partition(
        self,
        topic: &str,
        partition: i32,
        end_offset: i64,
        committed_offset: Option<i64>,
    ) -> Self {
        self.partitions.lock().push((
            TopicPartition::new(topic, partition),
            end_offset,
            committed_offset,
        ));
        self
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    /// 模拟再均衡回收分区
    pub fn revoke(&self, topic: &str, partition: i32) {
        let tp = TopicPartition::new(topic, partition);
        self.partitions.lock().retain(|(p, _, _)| *p != tp);
    }

    fn lookup(&self, tp: &TopicPartition) -> Result<(i64, Option<i64>)> {
        if *self.failing.lock() {
            return Err(SagaError::Kafka("模拟偏移量查询失败".to_string()));
        }
        self.partitions
            .lock()
            .iter()
            .find(|(p, _, _)| p == tp)
            .map(|(_, end, committed)| (*end, *committed))
            .ok_or_else(|| SagaError::Kafka(format!("未分配的分区: {tp}")))
    }
}

#[async_trait]
impl OffsetSource for StaticOffsetSource {
    async fn assigned_partitions(&self) -> Result<Vec<TopicPartition>> {
        if *self.failing.lock() {
            return Err(SagaError::Kafka("模拟分区查询失败".to_string()));
        }
        Ok(self
            .partitions
            .lock()
            .iter()
            .map(|(tp, _, _)| tp.clone())
            .collect())
    }

    async fn end_offset(&self, tp: &TopicPartition) -> Result<i64> {
        self.lookup(tp).map(|(end, _)| end)
    }

    async fn committed_offset(&self, tp: &TopicPartition) -> Result<Option<i64>> {
        self.lookup(tp).map(|(_, committed)| committed)
    }
}

// ==================== 偏移量提交记录 ====================

/// 记录每次提交的 `(topic, partition, next_offset)`
///
/// `set_failing(true)` 之后提交返回错误且不记录。
#[derive(Debug, Default)]
pub struct RecordingCommitter {
    commits: Mutex<Vec<(String, i32, i64)>>,
    failing: Mutex<bool>,
}

impl RecordingCommitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    pub fn commits(&self) -> Vec<(String, i32, i64)> {
        self.commits.lock().clone()
    }
}

impl OffsetCommitter for RecordingCommitter {
    fn commit_offset(&self, topic: &str, partition: i32, next_offset: i64) -> Result<()> {
        if *self.failing.lock() {
            return Err(SagaError::Kafka("模拟提交失败".to_string()));
        }
        self.commits
            .lock()
            .push((topic.to_string(), partition, next_offset));
        Ok(())
    }
}

// ==================== 测试数据 ====================

/// 构造订单创建事件
pub fn order_created(cart_price: Decimal, delivery_price: Decimal) -> OrderCreatedEvent {
    OrderCreatedEvent {
        order_id: Uuid::new_v4(),
        delivery_price,
        cart_price,
    }
}

/// 把原始负载包装成消费到的 Kafka 消息
pub fn consumer_message(topic: &str, offset: i64, payload: &[u8]) -> ConsumerMessage {
    ConsumerMessage {
        topic: topic.to_string(),
        partition: 0,
        offset,
        key: None,
        payload: payload.to_vec(),
    }
}

/// 把事件编码成消费到的 Kafka 消息
pub fn event_message(topic: &str, offset: i64, event: &OrderEvent) -> ConsumerMessage {
    let mut msg = consumer_message(topic, offset, &event.encode().unwrap_or_default());
    msg.key = Some(event.order_id().to_string());
    msg
}
