//! 订单仓储层
//!
//! 仓储只负责持久化，不包含业务规则；服务层依赖 trait 以便 mock 测试。

mod order_repo;
mod traits;

pub use order_repo::OrderRepository;
pub use traits::*;
