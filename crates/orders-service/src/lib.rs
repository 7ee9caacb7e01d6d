//! 订单服务
//!
//! 负责下单（发布 ORDER_CREATED）和应用价格归一化结果（消费 ORDER_UPDATED）。

pub mod consumer;
pub mod error;
pub mod models;
pub mod placement;
pub mod repository;
pub mod saga;
pub mod test_utils;

pub use error::{OrdersError, Result};
