//! 订单库连接池
//!
//! 订单服务在数据库暂不可达时也要能启动：消费到的 ORDER_UPDATED 会一直重投，
//! 直到数据库恢复。因此默认走 `connect_lazy`，首次查询时才真正建连。

use std::time::Duration;

use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, instrument, warn};

use crate::config::DatabaseConfig;
use crate::error::{Result, SagaError};

fn pool_options(config: &DatabaseConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
        .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
}

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 只校验 URL，不建连
    #[instrument(skip(config))]
    pub fn connect_lazy(config: &DatabaseConfig) -> Result<Self> {
        let pool = pool_options(config).connect_lazy(&config.url)?;
        info!(max_connections = config.max_connections, "订单库连接池已创建");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// 探测连通性，可达时执行迁移
    ///
    /// 返回数据库是否可用；不可达或迁移失败都只记录日志，进程照常启动。
    pub async fn prepare(&self, migrator: &Migrator) -> bool {
        if let Err(e) = self.health_check().await {
            warn!(error = %e, "订单库不可达，以降级模式启动");
            return false;
        }
        match migrator.run(&self.pool).await {
            Ok(()) => {
                info!("订单库迁移完成");
                true
            }
            Err(e) => {
                let e = SagaError::Database(e.into());
                warn!(error = %e, code = e.code(), "订单库迁移失败");
                false
            }
        }
    }

    /// 等待在途查询结束后关闭
    pub async fn close(&self) {
        self.pool.close().await;
        info!("订单库连接池已关闭");
    }
}
