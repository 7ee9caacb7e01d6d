//! Kafka 基础设施封装
//!
//! 将 rdkafka 的底层 API 封装为业务友好的 Producer/Consumer 抽象，
//! 统一消息序列化、错误映射、手动提交和优雅关闭语义。
//!
//! 消费端语义为至少一次：只有处理函数明确返回已处理/已丢弃时才提交偏移量；
//! 瞬时失败的消息按退避策略原地重投，进程在此期间退出时偏移量未提交，
//! 重启后由 broker 重新投递。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::{Offset, TopicPartitionList};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::KafkaConfig;
use crate::error::{Result, SagaError};
use crate::events::OrderEvent;
use crate::lag::{OffsetSource, TopicPartition};
use crate::observability::metrics;
use crate::retry::{RetryPolicy, retry_with_policy};

/// 元数据 / 偏移量查询的超时时间
const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Topic 常量
// ---------------------------------------------------------------------------

/// 默认 topic 名称，实际使用的名称以配置为准
pub mod topics {
    pub const ORDER_CREATED: &str = "order.created";
    pub const ORDER_UPDATED: &str = "order.updated";
}

// ---------------------------------------------------------------------------
// ConsumerMessage
// ---------------------------------------------------------------------------

/// 消费到的 Kafka 消息的统一表示
///
/// 将 rdkafka 的 `BorrowedMessage`（带生命周期约束）转换为拥有所有权的结构体，
/// 使消息可以安全地跨 await 点传递给异步处理函数。
#[derive(Debug, Clone)]
pub struct ConsumerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    /// 生产端写入的 order_id，仅用于日志定位
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

impl ConsumerMessage {
    fn from_borrowed(msg: &BorrowedMessage<'_>) -> Self {
        let key = msg
            .key()
            .and_then(|k| std::str::from_utf8(k).ok())
            .map(String::from);

        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key,
            payload: msg.payload().map(|p| p.to_vec()).unwrap_or_default(),
        }
    }

    /// 解码为订单事件，结构不合法时返回 `MalformedMessage`
    pub fn decode_event(&self) -> Result<OrderEvent> {
        OrderEvent::decode(&self.payload)
    }
}

// ---------------------------------------------------------------------------
// EventPublisher / KafkaProducer
// ---------------------------------------------------------------------------

/// 订单事件发布接口
///
/// 业务代码只依赖这个 trait，测试中用记录型实现替换真实的 Kafka。
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// 发布事件，以 order_id 作为消息 key，保证同一订单的事件落在同一分区
    async fn publish(&self, topic: &str, event: &OrderEvent) -> Result<()>;
}

/// 面向业务的 Kafka 生产者
///
/// 封装 `FutureProducer`（内部为 Arc，可廉价克隆），发送失败按重试策略重试。
#[derive(Clone)]
pub struct KafkaProducer {
    producer: FutureProducer,
    retry_policy: RetryPolicy,
}

impl KafkaProducer {
    pub fn new(config: &KafkaConfig, retry_policy: RetryPolicy) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", config.message_timeout_ms.to_string())
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .create()
            .map_err(|e| SagaError::Kafka(format!("创建生产者失败: {e}")))?;

        info!(brokers = %config.brokers, "Kafka 生产者已初始化");
        Ok(Self {
            producer,
            retry_policy,
        })
    }

    /// 发送原始字节消息
    pub async fn send(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(i32, i64)> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        let delivery = self
            .producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| SagaError::Kafka(format!("发送消息失败: {e}")))?;

        debug!(
            topic,
            key,
            partition = delivery.partition,
            offset = delivery.offset,
            "消息已发送"
        );
        Ok((delivery.partition, delivery.offset))
    }

    /// 检查 broker 是否可达
    pub async fn check_reachable(&self) -> Result<()> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.client().fetch_metadata(None, QUERY_TIMEOUT))
            .await
            .map_err(|e| SagaError::Internal(format!("元数据查询任务异常: {e}")))??;
        Ok(())
    }

    /// 等待所有在途消息被 broker 确认
    pub async fn flush(&self, timeout: Duration) -> Result<()> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| SagaError::Internal(format!("flush 任务异常: {e}")))??;
        info!("Kafka 生产者已 flush");
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for KafkaProducer {
    async fn publish(&self, topic: &str, event: &OrderEvent) -> Result<()> {
        let key = event.order_id().to_string();
        let payload = event.encode()?;

        retry_with_policy(&self.retry_policy, "kafka_publish", SagaError::is_retryable, || {
            self.send(topic, &key, &payload)
        })
        .await
        .map(|_| ())
        .map_err(|failure| failure.error)
    }
}

// ---------------------------------------------------------------------------
// KafkaConsumer
// ---------------------------------------------------------------------------

/// 处理函数对单条消息的处置结论
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDisposition {
    /// 已成功处理，提交偏移量
    Processed,
    /// 不可处理但也不应阻塞分区（格式错误等），记录后提交偏移量
    Discarded,
    /// 瞬时失败，不提交，退避后重投
    Redeliver,
}

impl MessageDisposition {
    fn outcome(&self) -> &'static str {
        match self {
            Self::Processed => "committed",
            Self::Discarded => "discarded",
            Self::Redeliver => "redelivered",
        }
    }
}

/// 偏移量提交接口
///
/// 消费循环只通过它提交，测试中用记录型实现替换真实的 broker。
pub trait OffsetCommitter: Send + Sync {
    /// 提交 `next_offset`，即该分区下一条待消费消息的位置
    fn commit_offset(&self, topic: &str, partition: i32, next_offset: i64) -> Result<()>;
}

impl OffsetCommitter for StreamConsumer {
    fn commit_offset(&self, topic: &str, partition: i32, next_offset: i64) -> Result<()> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(topic, partition, Offset::Offset(next_offset))?;
        Consumer::commit(self, &tpl, CommitMode::Async)?;
        Ok(())
    }
}

/// 反复调用 handler 直到消息被处理或丢弃，然后提交 `offset + 1`
///
/// 返回 false 表示在等待重投期间收到了关闭信号，此时不提交任何偏移量。
async fn deliver<C, F, Fut>(
    committer: &C,
    redelivery: &RetryPolicy,
    msg: &ConsumerMessage,
    shutdown: &mut watch::Receiver<bool>,
    handler: &F,
) -> bool
where
    C: OffsetCommitter + ?Sized,
    F: Fn(ConsumerMessage) -> Fut,
    Fut: Future<Output = MessageDisposition>,
{
    let mut failures: u32 = 0;

    loop {
        let disposition = handler(msg.clone()).await;
        metrics::record_saga_message(&msg.topic, disposition.outcome());

        if disposition != MessageDisposition::Redeliver {
            if let Err(e) = committer.commit_offset(&msg.topic, msg.partition, msg.offset + 1) {
                // 提交失败只会导致重复投递，处理是幂等的
                warn!(
                    error = %e,
                    topic = %msg.topic,
                    partition = msg.partition,
                    offset = msg.offset,
                    "提交偏移量失败"
                );
            }
            return true;
        }

        failures += 1;
        let delay = redelivery.delay_after(failures);
        warn!(
            topic = %msg.topic,
            partition = msg.partition,
            offset = msg.offset,
            failures,
            delay_ms = delay.as_millis() as u64,
            "消息处理失败，退避后重投"
        );

        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return false;
                }
            }

            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// 面向业务的 Kafka 消费者
///
/// 关闭自动提交，由消费循环根据 `MessageDisposition` 显式提交。
/// 底层 `StreamConsumer` 以 Arc 共享，延迟监控可以在消费进行中并发查询偏移量。
pub struct KafkaConsumer {
    consumer: Arc<StreamConsumer>,
    group_id: String,
    redelivery: RetryPolicy,
}

impl KafkaConsumer {
    /// 创建消费者
    ///
    /// `group_id_suffix` 允许同一服务内不同消费逻辑使用独立的消费组。
    pub fn new(
        config: &KafkaConfig,
        group_id_suffix: Option<&str>,
        redelivery: RetryPolicy,
    ) -> Result<Self> {
        let group_id = match group_id_suffix {
            Some(suffix) => format!("{}.{}", config.consumer_group, suffix),
            None => config.consumer_group.clone(),
        };

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &group_id)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| SagaError::Kafka(format!("创建消费者失败: {e}")))?;

        info!(brokers = %config.brokers, group_id, "Kafka 消费者已初始化");
        Ok(Self {
            consumer: Arc::new(consumer),
            group_id,
            redelivery,
        })
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// 订阅指定的 topic 列表
    pub fn subscribe(&self, topics: &[&str]) -> Result<()> {
        self.consumer
            .subscribe(topics)
            .map_err(|e| SagaError::Kafka(format!("订阅 topic 失败: {e}")))?;

        info!(?topics, "已订阅 Kafka topics");
        Ok(())
    }

    /// 供延迟监控使用的偏移量查询句柄
    pub fn offset_source(&self) -> KafkaOffsetSource {
        KafkaOffsetSource {
            consumer: Arc::clone(&self.consumer),
        }
    }

    /// 启动消费循环
    ///
    /// 使用 `tokio::select!` 同时监听消息流和关闭信号。关闭信号只在两条消息之间生效，
    /// 正在执行的 handler 总能完整结束。
    pub async fn start<F, Fut>(&self, mut shutdown: watch::Receiver<bool>, handler: F)
    where
        F: Fn(ConsumerMessage) -> Fut,
        Fut: Future<Output = MessageDisposition>,
    {
        use futures::StreamExt;

        let stream = self.consumer.stream();
        futures::pin_mut!(stream);

        info!(group_id = %self.group_id, "Kafka 消费循环已启动");

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("收到关闭信号，Kafka 消费循环退出");
                        break;
                    }
                }

                msg_result = stream.next() => {
                    let Some(msg_result) = msg_result else {
                        warn!("Kafka 消息流意外结束");
                        break;
                    };

                    let msg = match msg_result {
                        Ok(borrowed_msg) => ConsumerMessage::from_borrowed(&borrowed_msg),
                        Err(e) => {
                            error!(error = %e, "接收 Kafka 消息出错");
                            continue;
                        }
                    };

                    debug!(
                        topic = %msg.topic,
                        partition = msg.partition,
                        offset = msg.offset,
                        "收到 Kafka 消息"
                    );

                    let delivered = deliver(
                        self.consumer.as_ref(),
                        &self.redelivery,
                        &msg,
                        &mut shutdown,
                        &handler,
                    )
                    .await;
                    if !delivered {
                        info!(
                            topic = %msg.topic,
                            partition = msg.partition,
                            offset = msg.offset,
                            "关闭时消息尚未处理成功，偏移量未提交，重启后将重新投递"
                        );
                        break;
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// KafkaOffsetSource
// ---------------------------------------------------------------------------

/// 基于共享消费者句柄的偏移量查询
///
/// librdkafka 的水位和已提交偏移量查询是阻塞调用，统一放到 blocking 线程池执行。
#[derive(Clone)]
pub struct KafkaOffsetSource {
    consumer: Arc<StreamConsumer>,
}

#[async_trait]
impl OffsetSource for KafkaOffsetSource {
    async fn assigned_partitions(&self) -> Result<Vec<TopicPartition>> {
        let assignment = self.consumer.assignment()?;
        Ok(assignment
            .elements()
            .iter()
            .map(|e| TopicPartition::new(e.topic(), e.partition()))
            .collect())
    }

    async fn end_offset(&self, tp: &TopicPartition) -> Result<i64> {
        let consumer = Arc::clone(&self.consumer);
        let tp = tp.clone();
        let (_low, high) = tokio::task::spawn_blocking(move || {
            consumer.fetch_watermarks(&tp.topic, tp.partition, QUERY_TIMEOUT)
        })
        .await
        .map_err(|e| SagaError::Internal(format!("水位查询任务异常: {e}")))??;
        Ok(high)
    }

    async fn committed_offset(&self, tp: &TopicPartition) -> Result<Option<i64>> {
        let consumer = Arc::clone(&self.consumer);
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition(&tp.topic, tp.partition);

        let committed = tokio::task::spawn_blocking(move || {
            consumer.committed_offsets(tpl, QUERY_TIMEOUT)
        })
        .await
        .map_err(|e| SagaError::Internal(format!("已提交偏移量查询任务异常: {e}")))??;

        // 从未提交过时 librdkafka 返回 Offset::Invalid
        Ok(committed
            .find_partition(&tp.topic, tp.partition)
            .and_then(|e| match e.offset() {
                Offset::Offset(offset) => Some(offset),
                _ => None,
            }))
    }
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------
