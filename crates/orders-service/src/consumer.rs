//! ORDER_UPDATED 消费者

use saga_shared::kafka::KafkaConsumer;
use tokio::sync::watch;
use tracing::info;

use crate::error::Result;
use crate::saga::OrderUpdateApplier;

pub struct SagaConsumer {
    consumer: KafkaConsumer,
    applier: OrderUpdateApplier,
    topic: String,
}

impl SagaConsumer {
    pub fn new(consumer: KafkaConsumer, applier: OrderUpdateApplier, topic: &str) -> Self {
        Self {
            consumer,
            applier,
            topic: topic.to_string(),
        }
    }

    /// 订阅并消费，直到收到关闭信号
    ///
    /// 偏移量只在 `handle` 返回 `Processed`/`Discarded` 后提交，即持久化之后。
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        self.consumer.subscribe(&[self.topic.as_str()])?;
        info!(topic = %self.topic, group_id = self.consumer.group_id(), "saga 消费者已启动");

        let applier = &self.applier;
        self.consumer
            .start(shutdown, |msg| async move { applier.handle(&msg).await })
            .await;

        info!("saga 消费者已停止");
        Ok(())
    }
}
