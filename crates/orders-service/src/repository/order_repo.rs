//! 订单仓储（PostgreSQL）

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::traits::OrderRepositoryTrait;
use crate::error::Result;
use crate::models::{Order, OrderItem, OrderPriceUpdate};

pub struct OrderRepository {
    pool: PgPool,
}

impl OrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderRepositoryTrait for OrderRepository {
    async fn get(&self, order_id: Uuid) -> Result<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(
            r#"
            SELECT id, user_id, cart_price, delivery_price, total_price,
                   status, created_at, updated_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(order)
    }

    async fn create(&self, order: &Order, items: &[OrderItem]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, cart_price, delivery_price, total_price,
                                status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(order.id)
        .bind(order.user_id)
        .bind(order.cart_price)
        .bind(order.delivery_price)
        .bind(order.total_price)
        .bind(order.status)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        for item in items {
            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, product_id, quantity, unit_price)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(order.id)
            .bind(item.product_id)
            .bind(item.quantity)
            .bind(item.unit_price)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn apply_update(&self, order_id: Uuid, update: &OrderPriceUpdate) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET cart_price = $2, delivery_price = $3, total_price = $4,
                status = $5, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(order_id)
        .bind(update.cart_price)
        .bind(update.delivery_price)
        .bind(update.total_price)
        .bind(update.status)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
