//! 仓储 Trait 定义

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Order, OrderItem, OrderPriceUpdate};

/// 订单仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderRepositoryTrait: Send + Sync {
    async fn get(&self, order_id: Uuid) -> Result<Option<Order>>;
    /// 在同一事务中写入订单与订单行
    async fn create(&self, order: &Order, items: &[OrderItem]) -> Result<()>;
    /// 覆盖价格与状态，返回是否命中订单
    async fn apply_update(&self, order_id: Uuid, update: &OrderPriceUpdate) -> Result<bool>;
}
