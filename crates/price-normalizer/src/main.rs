//! 价格归一化服务入口
//!
//! 关闭顺序：延迟监控 -> 消费循环 -> 汇率刷新 -> 生产者 flush。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use saga_shared::cache::{InstrumentedCache, KeyValueCache, RedisCache};
use saga_shared::config::AppConfig;
use saga_shared::kafka::{KafkaConsumer, KafkaProducer};
use saga_shared::lag::LagMonitor;
use saga_shared::observability;
use saga_shared::retry::RetryPolicy;
use saga_shared::shutdown::shutdown_signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use price_normalizer::consumer::NormalizerConsumer;
use price_normalizer::processor::PriceNormalizer;
use price_normalizer::rate_api::ExchangeRateClient;
use price_normalizer::refresher::RateRefresher;
use price_normalizer::resolver::RateResolver;

const SERVICE_NAME: &str = "price-normalizer";
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 配置错误是唯一直接退出的情况
    let config = AppConfig::load(SERVICE_NAME)?;
    config.validate()?;

    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!(environment = %config.environment, "Starting price-normalizer...");

    // 2. 缓存与汇率 API
    let cache: Arc<dyn KeyValueCache> =
        Arc::new(InstrumentedCache::new(RedisCache::new(&config.redis)?));
    if let Err(e) = cache.ping().await {
        warn!(error = %e, "Redis 不可达，以降级模式启动");
    }

    let retry_policy = RetryPolicy::from(&config.retry);
    let rate_api = Arc::new(ExchangeRateClient::new(&config.exchange_api)?);
    let resolver = Arc::new(RateResolver::new(
        rate_api,
        cache,
        &config.exchange_api.base_currency,
        config.redis.rate_ttl(),
        retry_policy.clone(),
    ));

    // 3. Kafka
    let producer = KafkaProducer::new(&config.kafka, retry_policy.clone())?;
    if let Err(e) = producer.check_reachable().await {
        warn!(error = %e, "Kafka broker 不可达，以降级模式启动");
    }
    let consumer = KafkaConsumer::new(&config.kafka, Some("normalizer"), retry_policy)?;

    let normalizer = PriceNormalizer::new(
        resolver.clone(),
        Arc::new(producer.clone()),
        &config.exchange_api.target_currency,
        &config.kafka.order_updated_topic,
    );

    // 4. 后台任务，各自持有独立的关闭信号以便按顺序停止
    let (lag_tx, lag_rx) = watch::channel(false);
    let (consume_tx, consume_rx) = watch::channel(false);
    let (refresh_tx, refresh_rx) = watch::channel(false);

    let lag_monitor = LagMonitor::new(
        Arc::new(consumer.offset_source()),
        config.lag_monitor.interval(),
    );
    let lag_handle = tokio::spawn(lag_monitor.run(lag_rx));

    let consumer = NormalizerConsumer::new(consumer, normalizer, &config.kafka.order_created_topic);
    let consume_handle = tokio::spawn(consumer.run(consume_rx));

    let refresh_handle = match config.exchange_api.refresh_interval_seconds {
        0 => None,
        secs => {
            let refresher = RateRefresher::new(
                resolver,
                &config.exchange_api.target_currency,
                Duration::from_secs(secs),
            );
            Some(tokio::spawn(refresher.run(refresh_rx)))
        }
    };

    info!("price-normalizer started");

    // 5. 有序关闭
    shutdown_signal().await;

    let _ = lag_tx.send(true);
    if let Err(e) = lag_handle.await {
        error!(error = %e, "延迟监控任务异常退出");
    }

    let _ = consume_tx.send(true);
    match consume_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "消费循环返回错误"),
        Err(e) => error!(error = %e, "消费任务异常退出"),
    }

    let _ = refresh_tx.send(true);
    if let Some(handle) = refresh_handle {
        if let Err(e) = handle.await {
            error!(error = %e, "汇率刷新任务异常退出");
        }
    }

    if let Err(e) = producer.flush(FLUSH_TIMEOUT).await {
        error!(error = %e, "生产者 flush 失败，部分消息可能未确认");
    }

    info!("price-normalizer stopped");
    Ok(())
}
