//! 归一化流程集成测试
//!
//! 用内存缓存、脚本化汇率 API 和记录型发布者串起
//! 消息 -> 解析汇率 -> 换算 -> 发布 的完整路径。

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use price_normalizer::error::RateApiError;
use price_normalizer::processor::PriceNormalizer;
use price_normalizer::rate_api::RateApi;
use price_normalizer::resolver::RateResolver;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use saga_shared::events::OrderEvent;
use saga_shared::kafka::{MessageDisposition, topics};
use saga_shared::retry::{Jitter, RetryPolicy};
use saga_shared::test_utils::{MemoryCache, RecordingPublisher, event_message, order_created};

/// 按脚本依次返回结果的汇率 API，脚本耗尽后一直返回最后的汇率
struct ScriptedRateApi {
    script: Mutex<VecDeque<Result<Decimal, RateApiError>>>,
    fallback: Decimal,
    calls: Mutex<u32>,
}

impl ScriptedRateApi {
    fn new(script: Vec<Result<Decimal, RateApiError>>, fallback: Decimal) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: Mutex::new(0),
        }
    }

    fn calls(&self) -> u32 {
        *self.calls.lock()
    }
}

#[async_trait]
impl RateApi for ScriptedRateApi {
    async fn fetch_rates(&self) -> Result<HashMap<String, Decimal>, RateApiError> {
        *self.calls.lock() += 1;
        let next = self.script.lock().pop_front().unwrap_or(Ok(self.fallback));
        next.map(|rate| HashMap::from([("RUB".to_string(), rate)]))
    }
}

fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
        multiplier: 2.0,
        jitter: Jitter::Full,
    }
}

struct Harness {
    api: Arc<ScriptedRateApi>,
    cache: Arc<MemoryCache>,
    publisher: Arc<RecordingPublisher>,
    normalizer: PriceNormalizer,
}

fn harness(api: ScriptedRateApi, max_attempts: u32) -> Harness {
    let api = Arc::new(api);
    let cache = Arc::new(MemoryCache::new());
    let publisher = Arc::new(RecordingPublisher::new());
    let resolver = RateResolver::new(
        api.clone(),
        cache.clone(),
        "USD",
        Duration::from_secs(3600),
        fast_policy(max_attempts),
    );
    let normalizer = PriceNormalizer::new(
        Arc::new(resolver),
        publisher.clone(),
        "RUB",
        topics::ORDER_UPDATED,
    );
    Harness {
        api,
        cache,
        publisher,
        normalizer,
    }
}

#[tokio::test]
async fn test_orders_share_one_api_call_through_cache() {
    let h = harness(ScriptedRateApi::new(vec![], dec!(91.3456)), 3);

    for offset in 0..3 {
        let created = order_created(dec!(19.99), dec!(5.00));
        let msg = event_message(topics::ORDER_CREATED, offset, &created.into());
        assert_eq!(h.normalizer.handle(&msg).await, MessageDisposition::Processed);
    }

    assert_eq!(h.api.calls(), 1);
    assert_eq!(h.cache.write_count(), 1);
    assert_eq!(h.publisher.published().len(), 3);
}

#[tokio::test]
async fn test_transient_api_failures_recover_within_budget() {
    let h = harness(
        ScriptedRateApi::new(
            vec![
                Err(RateApiError::Timeout),
                Err(RateApiError::Status { status: 502 }),
                Err(RateApiError::Connection("reset".to_string())),
            ],
            dec!(91.3456),
        ),
        4,
    );
    let created = order_created(dec!(19.99), dec!(5.00));
    let msg = event_message(topics::ORDER_CREATED, 0, &created.clone().into());

    assert_eq!(h.normalizer.handle(&msg).await, MessageDisposition::Processed);
    assert_eq!(h.api.calls(), 4);

    let published = h.publisher.published();
    let OrderEvent::OrderUpdated(updated) = &published[0].2 else {
        panic!("应发布 ORDER_UPDATED");
    };
    assert_eq!(updated.order_id, created.order_id);
    assert_eq!(updated.total_price, dec!(2282.73));
}

#[tokio::test]
async fn test_exhausted_budget_leaves_message_uncommitted() {
    let h = harness(
        ScriptedRateApi::new(
            vec![Err(RateApiError::Timeout), Err(RateApiError::Timeout)],
            dec!(91.3456),
        ),
        2,
    );
    let msg = event_message(
        topics::ORDER_CREATED,
        0,
        &order_created(dec!(1.00), dec!(5.00)).into(),
    );

    assert_eq!(h.normalizer.handle(&msg).await, MessageDisposition::Redeliver);
    assert_eq!(h.api.calls(), 2);
    assert!(h.publisher.published().is_empty());

    // 重投时 API 已恢复
    assert_eq!(h.normalizer.handle(&msg).await, MessageDisposition::Processed);
    assert_eq!(h.api.calls(), 3);
}

#[tokio::test]
async fn test_cache_outage_does_not_block_normalization() {
    let h = harness(ScriptedRateApi::new(vec![], dec!(2)), 3);
    h.cache.set_unavailable(true);

    let msg = event_message(
        topics::ORDER_CREATED,
        0,
        &order_created(dec!(10.00), dec!(5.00)).into(),
    );

    assert_eq!(h.normalizer.handle(&msg).await, MessageDisposition::Processed);
    assert_eq!(h.publisher.published().len(), 1);
}
