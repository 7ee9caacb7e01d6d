//! 订单服务专用错误类型

use saga_shared::error::{SagaError, is_transient_db_error};

/// 订单服务错误
#[derive(Debug, thiserror::Error)]
pub enum OrdersError {
    /// 下单请求本身不合法（空购物车、数量非正等）
    #[error("订单无效: {0}")]
    InvalidOrder(String),

    /// 持久化失败，只有瞬时故障才重投
    #[error("订单持久化失败: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error(transparent)]
    Shared(#[from] SagaError),
}

impl OrdersError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Persistence(e) => is_transient_db_error(e),
            Self::Shared(e) => e.is_retryable(),
            Self::InvalidOrder(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, OrdersError>;
