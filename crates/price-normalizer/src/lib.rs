//! 订单价格归一化服务
//!
//! 消费 ORDER_CREATED 事件，按缓存优先的方式解析汇率，
//! 将源币种金额换算为目标币种后发布 ORDER_UPDATED 事件。

pub mod consumer;
pub mod error;
pub mod pricing;
pub mod processor;
pub mod rate_api;
pub mod refresher;
pub mod resolver;
