//! Redis 缓存管理模块
//!
//! 汇率缓存只需要有限的几种操作（get / set / delete / ping），
//! 因此对外暴露的是一个窄接口 `KeyValueCache`，而不是整个 Redis 客户端。
//! `InstrumentedCache` 作为装饰器包裹任意实现，为每种操作单独记录成功/失败指标。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use tracing::{info, instrument};

use crate::config::RedisConfig;
use crate::error::{Result, SagaError};
use crate::observability::metrics;

/// 键值缓存接口
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn ping(&self) -> Result<()>;
}

#[async_trait]
impl<C: KeyValueCache + ?Sized> KeyValueCache for Arc<C> {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        (**self).set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key).await
    }

    async fn ping(&self) -> Result<()> {
        (**self).ping().await
    }
}

// ---------------------------------------------------------------------------
// RedisCache
// ---------------------------------------------------------------------------

/// Redis 缓存客户端
///
/// 每次操作按需建立多路复用连接，进程启动时 Redis 不可达不会导致创建失败，
/// 恢复后下一次操作即可自动连上。
#[derive(Clone)]
pub struct RedisCache {
    client: Client,
}

impl RedisCache {
    /// 创建 Redis 客户端（只解析 URL，不建立连接）
    pub fn new(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())?;
        info!("Redis client created");
        Ok(Self { client })
    }

    async fn get_conn(&self) -> Result<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(SagaError::from)
    }
}

#[async_trait]
impl KeyValueCache for RedisCache {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.get_conn().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    #[instrument(skip(self, value))]
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.get_conn().await?;
        // SET EX 的最小粒度是秒
        let seconds = ttl.as_secs().max(1);
        let _: () = conn.set_ex(key, value, seconds).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.get_conn().await?;
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.get_conn().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(SagaError::from)
    }
}

// ---------------------------------------------------------------------------
// InstrumentedCache
// ---------------------------------------------------------------------------

/// 带指标的缓存装饰器
///
/// 每次调用都会记录 `redis_ops_total{operation, status}`，status 为 success / fail。
#[derive(Clone)]
pub struct InstrumentedCache<C> {
    inner: C,
}

impl<C: KeyValueCache> InstrumentedCache<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

fn observe<T>(operation: &'static str, result: Result<T>) -> Result<T> {
    metrics::record_cache_op(operation, result.is_ok());
    result
}

#[async_trait]
impl<C: KeyValueCache> KeyValueCache for InstrumentedCache<C> {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        observe("get", self.inner.get(key).await)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        observe("set", self.inner.set(key, value, ttl).await)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        observe("delete", self.inner.delete(key).await)
    }

    async fn ping(&self) -> Result<()> {
        observe("ping", self.inner.ping().await)
    }
}

/// 缓存键生成器
pub struct CacheKey;

impl CacheKey {
    /// 汇率缓存键：`rates:{BASE}_{TARGET}`
    pub fn rate(base: &str, target: &str) -> String {
        format!(
            "rates:{}_{}",
            base.to_ascii_uppercase(),
            target.to_ascii_uppercase()
        )
    }
}
