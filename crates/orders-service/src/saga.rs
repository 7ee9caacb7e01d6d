//! ORDER_UPDATED 应用（saga 的回写端）
//!
//! 按 order_id 覆盖价格与状态。同一事件重复应用得到相同结果；
//! 订单不存在时记录异常并视为已处理，避免永久缺失的订单造成无限重投。

use std::sync::Arc;

use saga_shared::events::{OrderEvent, OrderUpdatedEvent};
use saga_shared::kafka::{ConsumerMessage, MessageDisposition};
use tracing::{error, info, instrument, warn};

use crate::error::Result;
use crate::models::OrderPriceUpdate;
use crate::repository::OrderRepositoryTrait;

/// 单条更新事件的应用结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// 订单已处于事件描述的状态，或已推进到更后的履约状态
    AlreadyApplied,
    OrderNotFound,
}

pub struct OrderUpdateApplier {
    repo: Arc<dyn OrderRepositoryTrait>,
}

impl OrderUpdateApplier {
    pub fn new(repo: Arc<dyn OrderRepositoryTrait>) -> Self {
        Self { repo }
    }

    #[instrument(skip(self, event), fields(order_id = %event.order_id))]
    pub async fn apply(&self, event: &OrderUpdatedEvent) -> Result<ApplyOutcome> {
        let Some(order) = self.repo.get(event.order_id).await? else {
            warn!("ORDER_UPDATED 对应的订单不存在，记录异常后跳过");
            return Ok(ApplyOutcome::OrderNotFound);
        };

        let update = OrderPriceUpdate::from(event);
        if order.reflects(&update) {
            info!("更新已应用过，跳过");
            return Ok(ApplyOutcome::AlreadyApplied);
        }
        // 已发货/已送达/已取消的订单不回退到 updated
        if order.status.is_normalized() && order.status != update.status {
            warn!(
                current_status = %order.status,
                event_status = %update.status,
                "订单已进入后续状态，忽略过期的价格更新"
            );
            return Ok(ApplyOutcome::AlreadyApplied);
        }

        if !self.repo.apply_update(event.order_id, &update).await? {
            warn!("写回时订单已被删除");
            return Ok(ApplyOutcome::OrderNotFound);
        }

        info!(
            cart_price = %update.cart_price,
            delivery_price = %update.delivery_price,
            total_price = %update.total_price,
            status = %update.status,
            "订单价格已更新"
        );
        Ok(ApplyOutcome::Applied)
    }

    /// 处理一条 `order.updated` 消息
    ///
    /// 只有持久化成功（或确认无需写入）后才返回 `Processed`。
    pub async fn handle(&self, msg: &ConsumerMessage) -> MessageDisposition {
        let event = match msg.decode_event() {
            Ok(OrderEvent::OrderUpdated(event)) => event,
            Ok(other) => {
                warn!(
                    event_type = other.event_type(),
                    order_id = %other.order_id(),
                    topic = %msg.topic,
                    offset = msg.offset,
                    "收到非 ORDER_UPDATED 事件，丢弃"
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
                    "ORDER_UPDATED 消息格式错误，丢弃"
                );
                return MessageDisposition::Discarded;
            }
        };

        match self.apply(&event).await {
            Ok(_) => MessageDisposition::Processed,
            Err(e) if e.is_retryable() => {
                error!(order_id = %event.order_id, error = %e, "写回订单失败，消息不提交");
                MessageDisposition::Redeliver
            }
            Err(e) => {
                error!(order_id = %event.order_id, error = %e, "写回订单失败且不可重试，丢弃消息");
                MessageDisposition::Discarded
            }
        }
    }
}
