//! 订单实体

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use saga_shared::events::{OrderStatus, OrderUpdatedEvent};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 订单
///
/// 归一化之后满足 `total_price == cart_price + delivery_price`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub cart_price: Decimal,
    pub delivery_price: Decimal,
    pub total_price: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// 当前状态是否已经是该更新事件描述的结果
    pub fn reflects(&self, update: &OrderPriceUpdate) -> bool {
        self.status == update.status
            && self.cart_price == update.cart_price
            && self.delivery_price == update.delivery_price
            && self.total_price == update.total_price
    }

    /// 更新后的订单快照
    pub fn with_update(&self, update: &OrderPriceUpdate) -> Self {
        Self {
            cart_price: update.cart_price,
            delivery_price: update.delivery_price,
            total_price: update.total_price,
            status: update.status,
            ..self.clone()
        }
    }
}

/// 订单行
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
}

impl OrderItem {
    pub fn line_total(&self) -> Decimal {
        Decimal::from(self.quantity) * self.unit_price
    }
}

/// 下单请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub user_id: Uuid,
    pub items: Vec<OrderItem>,
}

/// 价格归一化写回的字段集合，整体覆盖而非累加
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderPriceUpdate {
    pub cart_price: Decimal,
    pub delivery_price: Decimal,
    pub total_price: Decimal,
    pub status: OrderStatus,
}

impl From<&OrderUpdatedEvent> for OrderPriceUpdate {
    fn from(event: &OrderUpdatedEvent) -> Self {
        Self {
            cart_price: event.cart_price,
            delivery_price: event.delivery_price,
            total_price: event.total_price,
            status: event.status,
        }
    }
}
