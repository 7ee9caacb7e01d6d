//! 汇率解析（cache-aside）
//!
//! 先查 Redis，未命中再调用外部 API（带退避重试），成功后回写缓存。
//! 多个实例并发回源时不做协调，缓存以最后写入者为准。

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use saga_shared::cache::{CacheKey, KeyValueCache};
use saga_shared::observability::metrics;
use saga_shared::retry::{RetryPolicy, retry_with_policy};
use tracing::{info, warn};

use crate::error::{NormalizerError, RateApiError};
use crate::rate_api::RateApi;

/// 汇率解析器
pub struct RateResolver {
    api: Arc<dyn RateApi>,
    cache: Arc<dyn KeyValueCache>,
    base_currency: String,
    ttl: Duration,
    retry_policy: RetryPolicy,
}

impl RateResolver {
    pub fn new(
        api: Arc<dyn RateApi>,
        cache: Arc<dyn KeyValueCache>,
        base_currency: &str,
        ttl: Duration,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            api,
            cache,
            base_currency: base_currency.to_ascii_uppercase(),
            ttl,
            retry_policy,
        }
    }

    pub fn base_currency(&self) -> &str {
        &self.base_currency
    }

    /// 解析 `base -> target` 汇率
    ///
    /// 重试耗尽时返回 `RateUnavailable`，绝不回退为 1:1。
    pub async fn resolve(&self, target_currency: &str) -> Result<Decimal, NormalizerError> {
        let target = target_currency.to_ascii_uppercase();
        let key = CacheKey::rate(&self.base_currency, &target);

        if let Some(rate) = self.cached_rate(&key).await {
            metrics::record_rate_resolution("cache");
            info!(source = "cache", key = %key, %rate, "命中汇率缓存");
            return Ok(rate);
        }

        let rate = match self.fetch_from_api(&target).await {
            Ok(rate) => rate,
            Err(e) => {
                metrics::record_rate_resolution("unavailable");
                return Err(e);
            }
        };
        self.store(&key, rate).await;

        metrics::record_rate_resolution("api");
        info!(source = "api", key = %key, %rate, "从汇率 API 获取汇率");
        Ok(rate)
    }

    /// 绕过缓存直接回源并覆盖缓存，供定时刷新使用
    pub async fn refresh(&self, target_currency: &str) -> Result<Decimal, NormalizerError> {
        let target = target_currency.to_ascii_uppercase();
        let rate = self.fetch_from_api(&target).await?;
        self.store(&CacheKey::rate(&self.base_currency, &target), rate)
            .await;
        Ok(rate)
    }

    /// 读缓存；读失败或内容不可解析都按未命中处理
    async fn cached_rate(&self, key: &str) -> Option<Decimal> {
        let raw = match self.cache.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, error = %e, "读取汇率缓存失败，回源到 API");
                return None;
            }
        };

        match Decimal::from_str(raw.trim()) {
            Ok(rate) if rate > Decimal::ZERO => Some(rate),
            _ => {
                warn!(key, value = %raw, "缓存中的汇率无效，回源到 API");
                None
            }
        }
    }

    /// 带重试地从 API 获取单个币种汇率
    async fn fetch_from_api(&self, target: &str) -> Result<Decimal, NormalizerError> {
        let api = &self.api;

        let rate = retry_with_policy(
            &self.retry_policy,
            "rate_api_fetch",
            RateApiError::is_transient,
            || async move {
                let rates = api.fetch_rates().await?;
                rates
                    .get(target)
                    .copied()
                    .ok_or_else(|| RateApiError::MissingSymbol {
                        symbol: target.to_string(),
                    })
            },
        )
        .await
        .map_err(|failure| NormalizerError::RateUnavailable {
            base: self.base_currency.clone(),
            target: target.to_string(),
            attempts: failure.attempts,
            reason: failure.error.to_string(),
        })?;

        if rate <= Decimal::ZERO {
            return Err(NormalizerError::InvalidRate {
                target: target.to_string(),
                rate,
            });
        }
        Ok(rate)
    }

    /// 回写缓存，失败不影响本次解析结果
    async fn store(&self, key: &str, rate: Decimal) {
        if let Err(e) = self.cache.set(key, &rate.to_string(), self.ttl).await {
            warn!(key, error = %e, "写入汇率缓存失败");
        }
    }
}
