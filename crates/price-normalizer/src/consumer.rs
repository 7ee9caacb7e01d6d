//! ORDER_CREATED 消费者
//!
//! 把 `KafkaConsumer` 的消费循环和 `PriceNormalizer` 组合起来。

use saga_shared::kafka::KafkaConsumer;
use tokio::sync::watch;
use tracing::info;

use crate::error::NormalizerError;
use crate::processor::PriceNormalizer;

pub struct NormalizerConsumer {
    consumer: KafkaConsumer,
    normalizer: PriceNormalizer,
    topic: String,
}

impl NormalizerConsumer {
    pub fn new(consumer: KafkaConsumer, normalizer: PriceNormalizer, topic: &str) -> Self {
        Self {
            consumer,
            normalizer,
            topic: topic.to_string(),
        }
    }

    /// 订阅并消费，直到收到关闭信号；正在处理的消息会先完成
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), NormalizerError> {
        self.consumer.subscribe(&[self.topic.as_str()])?;
        info!(topic = %self.topic, "价格归一化消费者已启动");

        let normalizer = &self.normalizer;
        self.consumer
            .start(shutdown, |msg| async move { normalizer.handle(&msg).await })
            .await;

        info!("价格归一化消费者已停止");
        Ok(())
    }
}
