//! 重试策略与执行器
//!
//! 提供带全抖动（full jitter）的指数退避重试机制，用于瞬时故障
//! （汇率 API 超时、Kafka 投递失败、数据库连接池满等）的自动恢复。
//! 所有网络调用统一经过 `retry_with_policy`，不在业务代码里手写 sleep 循环。
//! 业务逻辑错误（如响应格式错误）不应被重试，由调用方通过 `is_retryable` 闭包控制。

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

use crate::config::RetryConfig;

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// 退避抖动方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jitter {
    /// 严格按指数上限等待，主要用于测试
    None,
    /// 在 `[0, 上限]` 内均匀随机，避免多个实例同时重试
    Full,
}

/// 重试策略配置
///
/// 第 n 次失败后的退避上限为 `initial_delay * multiplier^(n-1)`，
/// 不超过 `max_delay`；实际等待时间再按 `jitter` 取值。
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 最大尝试次数（含首次执行）
    pub max_attempts: u32,
    /// 首次失败后的退避上限
    pub initial_delay: Duration,
    /// 退避时间上限，防止等待过长
    pub max_delay: Duration,
    /// 每次重试的退避倍数
    pub multiplier: f64,
    pub jitter: Jitter,
}

impl Default for RetryPolicy {
    /// 默认策略：最多尝试 3 次，初始上限 1 秒，最大 30 秒，倍数 2.0，全抖动
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: Jitter::Full,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            ..Self::default()
        }
    }
}

impl RetryPolicy {
    /// 计算连续失败 `failures` 次后的退避上限（failures 从 1 开始）
    pub fn backoff_ceiling(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.multiplier.powi(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }

    /// 连续失败 `failures` 次后实际应等待的时间
    pub fn delay_after(&self, failures: u32) -> Duration {
        let ceiling = self.backoff_ceiling(failures);
        match self.jitter {
            Jitter::None => ceiling,
            Jitter::Full => {
                let ceiling_ms = ceiling.as_millis() as u64;
                Duration::from_millis(rand::rng().random_range(0..=ceiling_ms))
            }
        }
    }

    /// 已执行 `attempts` 次后是否还能再试
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

// ---------------------------------------------------------------------------
// retry_with_policy
// ---------------------------------------------------------------------------

/// 重试最终失败的结果，携带实际尝试次数和最后一次错误
#[derive(Debug)]
pub struct RetryFailure<E> {
    pub attempts: u32,
    pub error: E,
}

/// 带重试的异步执行器
///
/// 仅在操作返回可重试错误时才重试；不可重试错误立即返回。
/// 尝试次数达到 `max_attempts` 后不再发起任何调用。
pub async fn retry_with_policy<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    is_retryable: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<T, RetryFailure<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        match operation().await {
            Ok(value) => {
                if attempts > 1 {
                    info!(operation = operation_name, attempts, "操作在重试后成功");
                }
                return Ok(value);
            }
            Err(error) => {
                if !is_retryable(&error) {
                    warn!(
                        operation = operation_name,
                        error = %error,
                        "操作失败且不可重试，直接返回错误"
                    );
                    return Err(RetryFailure { attempts, error });
                }

                if !policy.should_retry(attempts) {
                    warn!(
                        operation = operation_name,
                        attempts,
                        max_attempts = policy.max_attempts,
                        error = %error,
                        "已达最大尝试次数，放弃重试"
                    );
                    return Err(RetryFailure { attempts, error });
                }

                let delay = policy.delay_after(attempts);
                warn!(
                    operation = operation_name,
                    attempt = attempts,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "操作失败，将在退避后重试"
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------
