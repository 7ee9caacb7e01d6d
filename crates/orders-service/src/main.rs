//! 订单服务入口
//!
//! 本进程只承担 saga 的回写端（消费 ORDER_UPDATED）。下单入口 `OrderPlacement`
//! 由承载下单 API 的接入层自行组装并持有生产者，不在这里构造。
//!
//! 关闭顺序：延迟监控 -> 消费循环 -> 关闭连接池。

use std::sync::Arc;

use anyhow::Result;
use saga_shared::config::AppConfig;
use saga_shared::database::Database;
use saga_shared::kafka::KafkaConsumer;
use saga_shared::lag::LagMonitor;
use saga_shared::observability;
use saga_shared::retry::RetryPolicy;
use saga_shared::shutdown::shutdown_signal;
use tokio::sync::watch;
use tracing::{error, info};

use orders_service::consumer::SagaConsumer;
use orders_service::repository::{OrderRepository, OrderRepositoryTrait};
use orders_service::saga::OrderUpdateApplier;

const SERVICE_NAME: &str = "orders-service";

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load(SERVICE_NAME)?;
    config.validate()?;

    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!(environment = %config.environment, "Starting orders-service...");

    // 1. 数据库：延迟建连，数据库不可达时照常启动，消息会在恢复前持续重投
    let db = Database::connect_lazy(&config.database)?;
    db.prepare(&sqlx::migrate!("./migrations")).await;
    let repo: Arc<dyn OrderRepositoryTrait> = Arc::new(OrderRepository::new(db.pool().clone()));

    // 2. Kafka
    let consumer = KafkaConsumer::new(&config.kafka, None, RetryPolicy::from(&config.retry))?;

    // 3. 后台任务
    let (lag_tx, lag_rx) = watch::channel(false);
    let (consume_tx, consume_rx) = watch::channel(false);

    let lag_monitor = LagMonitor::new(
        Arc::new(consumer.offset_source()),
        config.lag_monitor.interval(),
    );
    let lag_handle = tokio::spawn(lag_monitor.run(lag_rx));

    let saga_consumer = SagaConsumer::new(
        consumer,
        OrderUpdateApplier::new(repo),
        &config.kafka.order_updated_topic,
    );
    let consume_handle = tokio::spawn(saga_consumer.run(consume_rx));

    info!("orders-service started");

    // 4. 有序关闭
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

    db.close().await;

    info!("orders-service stopped");
    Ok(())
}
