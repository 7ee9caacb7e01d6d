//! 测试替身与缓存装饰器的集成测试

use std::sync::Arc;
use std::time::Duration;

use rust_decimal_macros::dec;
use saga_shared::cache::{CacheKey, InstrumentedCache, KeyValueCache};
use saga_shared::events::OrderEvent;
use saga_shared::kafka::{EventPublisher, topics};
use saga_shared::lag::LagMonitor;
use saga_shared::test_utils::*;

#[tokio::test]
async fn test_memory_cache_expires_entries() {
    let cache = MemoryCache::new();
    let key = CacheKey::rate("usd", "eur");

    cache.set(&key, "0.92", Duration::from_millis(20)).await.unwrap();
    assert_eq!(cache.get(&key).await.unwrap().as_deref(), Some("0.92"));

    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(cache.get(&key).await.unwrap(), None);
}

#[tokio::test]
async fn test_instrumented_cache_passes_through() {
    let cache = InstrumentedCache::new(MemoryCache::new());

    cache.set("rates:USD_EUR", "0.92", Duration::from_secs(60)).await.unwrap();
    assert_eq!(
        cache.get("rates:USD_EUR").await.unwrap().as_deref(),
        Some("0.92")
    );
    assert_eq!(cache.inner().write_count(), 1);

    cache.inner().set_unavailable(true);
    assert!(cache.get("rates:USD_EUR").await.is_err());
    assert!(cache.ping().await.is_err());
}

#[tokio::test]
async fn test_recording_publisher_keys_by_order_id() {
    let publisher = RecordingPublisher::new();
    let created = order_created(dec!(19.99), dec!(5.00));
    let order_id = created.order_id;

    publisher
        .publish(topics::ORDER_CREATED, &OrderEvent::from(created))
        .await
        .unwrap();

    let published = publisher.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, topics::ORDER_CREATED);
    assert_eq!(published[0].1, order_id.to_string());

    publisher.set_failing(true);
    let again = OrderEvent::from(order_created(dec!(1), dec!(1)));
    assert!(publisher.publish(topics::ORDER_CREATED, &again).await.is_err());
    assert_eq!(publisher.published().len(), 1);
}

#[test]
fn test_event_message_round_trips_through_decode() {
    let event = OrderEvent::from(order_created(dec!(19.99), dec!(5.00)));
    let msg = event_message(topics::ORDER_CREATED, 42, &event);

    assert_eq!(msg.offset, 42);
    assert_eq!(msg.key, Some(event.order_id().to_string()));
    assert_eq!(msg.decode_event().unwrap(), event);
}

#[tokio::test]
async fn test_lag_monitor_over_static_offsets() {
    let source = StaticOffsetSource::new()
        .with_partition(topics::ORDER_CREATED, 0, 150, Some(100))
        .with_partition(topics::ORDER_CREATED, 1, 80, None)
        .with_partition(topics::ORDER_UPDATED, 0, 10, Some(10));
    let monitor = LagMonitor::new(Arc::new(source), Duration::from_secs(10));

    let samples = monitor.sample().await.unwrap();

    let lags: Vec<(String, i32, i64)> = samples
        .iter()
        .map(|s| (s.topic.clone(), s.partition, s.lag))
        .collect();
    assert_eq!(
        lags,
        vec![
            (topics::ORDER_CREATED.to_string(), 0, 50),
            (topics::ORDER_CREATED.to_string(), 1, 80),
            (topics::ORDER_UPDATED.to_string(), 0, 0),
        ]
    );
}
