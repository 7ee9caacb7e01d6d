//! 订单 saga 共享库
//!
//! 两个服务共用的基础设施：配置、错误类型、事件契约、Redis 缓存、
//! Kafka 生产/消费、重试策略、消费延迟监控与可观测性初始化。

pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod events;
pub mod kafka;
pub mod lag;
pub mod observability;
pub mod retry;
pub mod shutdown;
pub mod test_utils;

pub use error::{Result, SagaError};
