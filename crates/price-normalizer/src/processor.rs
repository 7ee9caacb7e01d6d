//! 订单价格归一化处理器
//!
//! ORDER_CREATED -> 解析汇率 -> 换算金额 -> 发布 ORDER_UPDATED。
//! 处理结果映射为 `MessageDisposition`，由消费循环决定提交还是重投：
//! 只有 ORDER_UPDATED 发布成功后源消息才会被提交。

use std::sync::Arc;

use saga_shared::events::{OrderCreatedEvent, OrderEvent, OrderStatus, OrderUpdatedEvent};
use saga_shared::kafka::{ConsumerMessage, EventPublisher, MessageDisposition};
use tracing::{error, info, instrument, warn};

use crate::error::NormalizerError;
use crate::pricing;
use crate::resolver::RateResolver;

/// 价格归一化处理器
pub struct PriceNormalizer {
    resolver: Arc<RateResolver>,
    publisher: Arc<dyn EventPublisher>,
    target_currency: String,
    updated_topic: String,
}

impl PriceNormalizer {
    pub fn new(
        resolver: Arc<RateResolver>,
        publisher: Arc<dyn EventPublisher>,
        target_currency: &str,
        updated_topic: &str,
    ) -> Self {
        Self {
            resolver,
            publisher,
            target_currency: target_currency.to_ascii_uppercase(),
            updated_topic: updated_topic.to_string(),
        }
    }

    /// 换算并发布一条订单的归一化结果
    #[instrument(skip(self, event), fields(order_id = %event.order_id))]
    pub async fn normalize(
        &self,
        event: &OrderCreatedEvent,
    ) -> Result<OrderUpdatedEvent, NormalizerError> {
        let rate = self.resolver.resolve(&self.target_currency).await?;

        let prices = pricing::convert(event.cart_price, event.delivery_price, rate).ok_or(
            NormalizerError::PriceOverflow {
                order_id: event.order_id,
            },
        )?;

        let updated = OrderUpdatedEvent {
            order_id: event.order_id,
            delivery_price: prices.delivery_price,
            cart_price: prices.cart_price,
            total_price: prices.total_price,
            status: OrderStatus::Updated,
        };

        self.publisher
            .publish(&self.updated_topic, &OrderEvent::from(updated.clone()))
            .await?;

        info!(
            %rate,
            currency = %self.target_currency,
            cart_price = %updated.cart_price,
            delivery_price = %updated.delivery_price,
            total_price = %updated.total_price,
            "订单价格已归一化"
        );
        Ok(updated)
    }

    /// 处理一条 `order.created` 消息
    pub async fn handle(&self, msg: &ConsumerMessage) -> MessageDisposition {
        let event = match msg.decode_event() {
            Ok(OrderEvent::OrderCreated(event)) => event,
            Ok(other) => {
                warn!(
                    event_type = other.event_type(),
                    order_id = %other.order_id(),
                    topic = %msg.topic,
                    offset = msg.offset,
                    "收到非 ORDER_CREATED 事件，丢弃"
                );
                return MessageDisposition::Discarded;
            }
            Err(e) => {
                warn!(
                    error = %e,
                    topic = %msg.topic,
                    partition = msg.partition,
                    offset = msg.offset,
                    key = ?msg.key,
                    "ORDER_CREATED 消息格式错误，丢弃"
                );
                return MessageDisposition::Discarded;
            }
        };

        match self.normalize(&event).await {
            Ok(_) => MessageDisposition::Processed,
            Err(e) if e.is_retryable() => {
                error!(
                    order_id = %event.order_id,
                    error = %e,
                    "价格归一化失败，消息不提交"
                );
                MessageDisposition::Redeliver
            }
            Err(e) => {
                error!(
                    order_id = %event.order_id,
                    error = %e,
                    "价格归一化失败且不可重试，丢弃消息"
                );
                MessageDisposition::Discarded
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;
    use crate::error::RateApiError;
    use crate::rate_api::MockRateApi;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use saga_shared::kafka::topics;
    use saga_shared::retry::{Jitter, RetryPolicy};
    use saga_shared::test_utils::{
        MemoryCache, RecordingPublisher, consumer_message, event_message, order_created,
    };

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            multiplier: 2.0,
            jitter: Jitter::None,
        }
    }

    fn normalizer(api: MockRateApi, publisher: Arc<RecordingPublisher>) -> PriceNormalizer {
        let resolver = RateResolver::new(
            Arc::new(api),
            Arc::new(MemoryCache::new()),
            "USD",
            Duration::from_secs(3600),
            policy(),
        );
        PriceNormalizer::new(Arc::new(resolver), publisher, "RUB", topics::ORDER_UPDATED)
    }

    fn rate_api(rate: Decimal) -> MockRateApi {
        let mut api = MockRateApi::new();
        api.expect_fetch_rates()
            .returning(move || Ok(HashMap::from([("RUB".to_string(), rate)])));
        api
    }

    #[tokio::test]
    async fn test_created_event_produces_updated_event() {
        let publisher = Arc::new(RecordingPublisher::new());
        let normalizer = normalizer(rate_api(dec!(91.3456)), publisher.clone());
        let created = order_created(dec!(19.99), dec!(5.00));
        let msg = event_message(topics::ORDER_CREATED, 7, &created.clone().into());

        assert_eq!(normalizer.handle(&msg).await, MessageDisposition::Processed);

        let published = publisher.published();
        assert_eq!(published.len(), 1);
        let (topic, key, event) = &published[0];
        assert_eq!(topic, topics::ORDER_UPDATED);
        assert_eq!(key, &created.order_id.to_string());

        let OrderEvent::OrderUpdated(updated) = event else {
            panic!("应发布 ORDER_UPDATED");
        };
        assert_eq!(updated.order_id, created.order_id);
        assert_eq!(updated.cart_price, dec!(1826.00));
        assert_eq!(updated.delivery_price, dec!(456.73));
        assert_eq!(updated.total_price, dec!(2282.73));
        assert_eq!(updated.status, OrderStatus::Updated);
    }

    #[tokio::test]
    async fn test_missing_order_id_is_discarded_without_event() {
        let publisher = Arc::new(RecordingPublisher::new());
        let mut api = MockRateApi::new();
        api.expect_fetch_rates().never();
        let normalizer = normalizer(api, publisher.clone());

        let msg = consumer_message(
            topics::ORDER_CREATED,
            3,
            br#"{"event_type":"ORDER_CREATED","delivery_price":5.0,"cart_price":19.99}"#,
        );

        assert_eq!(normalizer.handle(&msg).await, MessageDisposition::Discarded);
        assert!(publisher.published().is_empty());
    }

    #[tokio::test]
    async fn test_rate_unavailable_requests_redelivery() {
        let publisher = Arc::new(RecordingPublisher::new());
        let mut api = MockRateApi::new();
        api.expect_fetch_rates()
            .times(2)
            .returning(|| Err(RateApiError::Timeout));
        let normalizer = normalizer(api, publisher.clone());
        let msg = event_message(
            topics::ORDER_CREATED,
            0,
            &order_created(dec!(10.00), dec!(5.00)).into(),
        );

        assert_eq!(normalizer.handle(&msg).await, MessageDisposition::Redeliver);
        assert!(publisher.published().is_empty());
    }

    #[tokio::test]
    async fn test_publish_failure_requests_redelivery() {
        let publisher = Arc::new(RecordingPublisher::new());
        publisher.set_failing(true);
        let normalizer = normalizer(rate_api(dec!(2)), publisher.clone());
        let msg = event_message(
            topics::ORDER_CREATED,
            0,
            &order_created(dec!(10.00), dec!(5.00)).into(),
        );

        assert_eq!(normalizer.handle(&msg).await, MessageDisposition::Redeliver);
    }

    #[tokio::test]
    async fn test_updated_event_on_created_topic_is_discarded() {
        let publisher = Arc::new(RecordingPublisher::new());
        let normalizer = normalizer(rate_api(dec!(2)), publisher.clone());
        let updated = OrderUpdatedEvent {
            order_id: uuid::Uuid::new_v4(),
            delivery_price: dec!(1.00),
            cart_price: dec!(2.00),
            total_price: dec!(3.00),
            status: OrderStatus::Updated,
        };
        let msg = event_message(topics::ORDER_CREATED, 0, &updated.into());

        assert_eq!(normalizer.handle(&msg).await, MessageDisposition::Discarded);
        assert!(publisher.published().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_created_event_recomputes_same_update() {
        let publisher = Arc::new(RecordingPublisher::new());
        let normalizer = normalizer(rate_api(dec!(91.3456)), publisher.clone());
        let created = order_created(dec!(19.99), dec!(5.00));

        let first = normalizer.normalize(&created).await.unwrap();
        let second = normalizer.normalize(&created).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(publisher.published().len(), 2);
    }
}
