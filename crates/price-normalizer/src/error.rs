//! 价格归一化服务专用错误类型
//!
//! 汇率 API 的错误单独建模，以便重试器区分瞬时故障与确定性失败；
//! `NormalizerError` 则是消费处理函数据以决定提交还是重投的依据。

use rust_decimal::Decimal;
use saga_shared::error::SagaError;
use uuid::Uuid;

/// 汇率 API 调用错误
#[derive(Debug, thiserror::Error)]
pub enum RateApiError {
    #[error("汇率 API 请求超时")]
    Timeout,

    #[error("汇率 API 连接失败: {0}")]
    Connection(String),

    /// 非 2xx 响应
    #[error("汇率 API 返回异常状态码: {status}")]
    Status { status: u16 },

    /// 响应体不是预期的 JSON 结构
    #[error("汇率 API 响应格式错误: {0}")]
    Malformed(String),

    #[error("汇率 API 响应缺少币种: {symbol}")]
    MissingSymbol { symbol: String },
}

impl RateApiError {
    /// 超时、连接失败和非 2xx 属于瞬时故障，值得重试
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Connection(_) | Self::Status { .. }
        )
    }

    /// 指标标签
    pub fn status_label(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connection(_) => "connection_error",
            Self::Status { .. } => "http_error",
            Self::Malformed(_) | Self::MissingSymbol { .. } => "malformed",
        }
    }
}

impl From<reqwest::Error> for RateApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Malformed(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Status {
                status: status.as_u16(),
            }
        } else {
            Self::Connection(err.to_string())
        }
    }
}

/// 归一化流程错误
#[derive(Debug, thiserror::Error)]
pub enum NormalizerError {
    /// 重试耗尽仍拿不到汇率，触发消息不得提交
    #[error("汇率不可用: {base}->{target}，共尝试 {attempts} 次: {reason}")]
    RateUnavailable {
        base: String,
        target: String,
        attempts: u32,
        reason: String,
    },

    /// 汇率必须为正数
    #[error("汇率非法: {target}={rate}")]
    InvalidRate { target: String, rate: Decimal },

    /// 金额换算溢出
    #[error("订单 {order_id} 金额换算溢出")]
    PriceOverflow { order_id: Uuid },

    #[error(transparent)]
    Shared(#[from] SagaError),
}

impl NormalizerError {
    /// 是否应让消息重投
    ///
    /// 换算溢出是确定性的，重投结果不会变化。
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateUnavailable { .. } | Self::InvalidRate { .. } => true,
            Self::PriceOverflow { .. } => false,
            Self::Shared(e) => e.is_retryable(),
        }
    }
}
