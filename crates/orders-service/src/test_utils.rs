//! 测试用内存仓储

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{OrdersError, Result};
use crate::models::{Order, OrderItem, OrderPriceUpdate};
use crate::repository::OrderRepositoryTrait;

/// 以 HashMap 保存订单的仓储
///
/// `set_unavailable(true)` 之后所有操作返回可重试的错误，用于模拟数据库宕机。
#[derive(Debug, Default)]
pub struct InMemoryOrderRepository {
    orders: Mutex<HashMap<Uuid, Order>>,
    unavailable: Mutex<bool>,
    writes: Mutex<u32>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock() = unavailable;
    }

    /// `apply_update` 实际写入的次数
    pub fn update_count(&self) -> u32 {
        *self.writes.lock()
    }

    pub fn snapshot(&self, order_id: Uuid) -> Option<Order> {
        self.orders.lock().get(&order_id).cloned()
    }

    fn check_available(&self) -> Result<()> {
        if *self.unavailable.lock() {
            return Err(OrdersError::Persistence(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderRepositoryTrait for InMemoryOrderRepository {
    async fn get(&self, order_id: Uuid) -> Result<Option<Order>> {
        self.check_available()?;
        Ok(self.snapshot(order_id))
    }

    async fn create(&self, order: &Order, _items: &[OrderItem]) -> Result<()> {
        self.check_available()?;
        self.orders.lock().insert(order.id, order.clone());
        Ok(())
    }

    async fn apply_update(&self, order_id: Uuid, update: &OrderPriceUpdate) -> Result<bool> {
        self.check_available()?;
        let mut orders = self.orders.lock();
        let Some(order) = orders.get_mut(&order_id) else {
            return Ok(false);
        };
        *order = Order {
            updated_at: Utc::now(),
            ..order.with_update(update)
        };
        *self.writes.lock() += 1;
        Ok(true)
    }
}
