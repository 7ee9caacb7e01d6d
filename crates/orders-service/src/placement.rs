//! 下单（saga 的发起端）
//!
//! 计算源币种金额，以 `processing` 状态落库，再发布 ORDER_CREATED。
//! 发布失败不回滚订单：订单保持 `processing`，由日志与延迟监控暴露问题。

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use saga_shared::events::{OrderCreatedEvent, OrderEvent, OrderStatus};
use saga_shared::kafka::EventPublisher;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::error::{OrdersError, Result};
use crate::models::{NewOrder, Order, OrderItem};
use crate::repository::OrderRepositoryTrait;

/// 购物车金额：Σ 数量 × 单价，保留两位小数
pub fn cart_price(items: &[OrderItem]) -> Decimal {
    let mut total: Decimal = items.iter().map(OrderItem::line_total).sum();
    total.rescale(2);
    total
}

fn validate(order: &NewOrder) -> Result<()> {
    if order.items.is_empty() {
        return Err(OrdersError::InvalidOrder("购物车为空".to_string()));
    }
    for item in &order.items {
        if item.quantity <= 0 {
            return Err(OrdersError::InvalidOrder(format!(
                "商品 {} 的数量必须为正: {}",
                item.product_id, item.quantity
            )));
        }
        if item.unit_price.is_sign_negative() {
            return Err(OrdersError::InvalidOrder(format!(
                "商品 {} 的单价不能为负: {}",
                item.product_id, item.unit_price
            )));
        }
    }
    Ok(())
}

pub struct OrderPlacement {
    repo: Arc<dyn OrderRepositoryTrait>,
    publisher: Arc<dyn EventPublisher>,
    delivery_price: Decimal,
    created_topic: String,
}

impl OrderPlacement {
    pub fn new(
        repo: Arc<dyn OrderRepositoryTrait>,
        publisher: Arc<dyn EventPublisher>,
        delivery_price: Decimal,
        created_topic: &str,
    ) -> Self {
        let mut delivery_price = delivery_price;
        delivery_price.rescale(2);
        Self {
            repo,
            publisher,
            delivery_price,
            created_topic: created_topic.to_string(),
        }
    }

    #[instrument(skip(self, new_order), fields(user_id = %new_order.user_id))]
    pub async fn place(&self, new_order: NewOrder) -> Result<Order> {
        validate(&new_order)?;

        let cart_price = cart_price(&new_order.items);
        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4(),
            user_id: new_order.user_id,
            cart_price,
            delivery_price: self.delivery_price,
            total_price: cart_price + self.delivery_price,
            status: OrderStatus::Processing,
            created_at: now,
            updated_at: now,
        };

        self.repo.create(&order, &new_order.items).await?;

        let event = OrderEvent::from(OrderCreatedEvent {
            order_id: order.id,
            delivery_price: order.delivery_price,
            cart_price: order.cart_price,
        });
        match self.publisher.publish(&self.created_topic, &event).await {
            Ok(()) => info!(
                order_id = %order.id,
                cart_price = %order.cart_price,
                total_price = %order.total_price,
                "订单已创建，等待价格归一化"
            ),
            Err(e) => error!(
                order_id = %order.id,
                error = %e,
                "ORDER_CREATED 发布失败，订单停留在 processing"
            ),
        }

        Ok(order)
    }
}
