//! 订单事件契约
//!
//! 定义在 `order.created` / `order.updated` 两个 topic 上流转的消息。
//! 事件是封闭的标签枚举：`event_type` 决定变体，每个变体字段固定，
//! 缺字段或多字段都会在解码时直接失败，而不是得到一个残缺的字典。
//!
//! 金额一律使用 `Decimal`：写出时序列化为字符串以保证精度，
//! 读入时同时接受 JSON 数字和字符串。

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SagaError;

// ---------------------------------------------------------------------------
// OrderStatus
// ---------------------------------------------------------------------------

/// 订单状态
///
/// `processing` 表示仍以源币种计价、等待价格归一化；
/// `updated` 及其后的状态都已完成归一化。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "order_status", rename_all = "lowercase")]
pub enum OrderStatus {
    Created,
    Processing,
    Updated,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Processing => "processing",
            Self::Updated => "updated",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    /// 是否已完成价格归一化
    pub fn is_normalized(&self) -> bool {
        matches!(
            self,
            Self::Updated | Self::Shipped | Self::Delivered | Self::Cancelled
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// 事件载荷
// ---------------------------------------------------------------------------

/// 订单创建事件，金额为源币种
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrderCreatedEvent {
    pub order_id: Uuid,
    pub delivery_price: Decimal,
    pub cart_price: Decimal,
}

/// 订单价格已归一化事件，金额为目标币种
///
/// 幂等键为 `order_id`：同一事件重复应用得到相同的最终状态。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrderUpdatedEvent {
    pub order_id: Uuid,
    pub delivery_price: Decimal,
    pub cart_price: Decimal,
    pub total_price: Decimal,
    pub status: OrderStatus,
}

// ---------------------------------------------------------------------------
// OrderEvent
// ---------------------------------------------------------------------------

/// 所有订单事件的封闭集合
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum OrderEvent {
    #[serde(rename = "ORDER_CREATED")]
    OrderCreated(OrderCreatedEvent),
    #[serde(rename = "ORDER_UPDATED")]
    OrderUpdated(OrderUpdatedEvent),
}

impl OrderEvent {
    pub const ORDER_CREATED: &'static str = "ORDER_CREATED";
    pub const ORDER_UPDATED: &'static str = "ORDER_UPDATED";

    /// 解码 JSON 负载
    ///
    /// 任何结构问题（非 JSON、未知 event_type、缺少 order_id、多余字段）
    /// 都归为 `MalformedMessage`，调用方据此丢弃消息而不是重投。
    pub fn decode(payload: &[u8]) -> Result<Self, SagaError> {
        serde_json::from_slice(payload).map_err(|e| SagaError::MalformedMessage(e.to_string()))
    }

    pub fn encode(&self) -> Result<Vec<u8>, SagaError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn order_id(&self) -> Uuid {
        match self {
            Self::OrderCreated(e) => e.order_id,
            Self::OrderUpdated(e) => e.order_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::OrderCreated(_) => Self::ORDER_CREATED,
            Self::OrderUpdated(_) => Self::ORDER_UPDATED,
        }
    }
}

impl From<OrderCreatedEvent> for OrderEvent {
    fn from(event: OrderCreatedEvent) -> Self {
        Self::OrderCreated(event)
    }
}

impl From<OrderUpdatedEvent> for OrderEvent {
    fn from(event: OrderUpdatedEvent) -> Self {
        Self::OrderUpdated(event)
    }
}
