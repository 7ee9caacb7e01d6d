//! 定时汇率刷新
//!
//! 独立于订单流量周期性回源，让缓存在过期前被主动覆盖，
//! 订单处理路径因此很少需要同步调用外部 API。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use crate::resolver::RateResolver;

pub struct RateRefresher {
    resolver: Arc<RateResolver>,
    target_currency: String,
    interval: Duration,
}

impl RateRefresher {
    pub fn new(resolver: Arc<RateResolver>, target_currency: &str, interval: Duration) -> Self {
        Self {
            resolver,
            target_currency: target_currency.to_ascii_uppercase(),
            interval,
        }
    }

    /// 首次 tick 立即触发，用于启动时预热缓存
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            interval_secs = self.interval.as_secs(),
            currency = %self.target_currency,
            "汇率定时刷新已启动"
        );

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }

                _ = ticker.tick() => {
                    match self.resolver.refresh(&self.target_currency).await {
                        Ok(rate) => info!(
                            base = self.resolver.base_currency(),
                            currency = %self.target_currency,
                            %rate,
                            "汇率已刷新"
                        ),
                        Err(e) => error!(error = %e, "汇率刷新失败"),
                    }
                }
            }
        }

        info!("汇率定时刷新已停止");
    }
}
