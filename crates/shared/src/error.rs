//! 统一错误处理模块
//!
//! 定义订单流水线各服务共享的错误类型，使用 thiserror 提供良好的错误信息。

use thiserror::Error;

/// 系统错误类型
#[derive(Debug, Error)]
pub enum SagaError {
    // ==================== 数据库错误 ====================
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    // ==================== 缓存错误 ====================
    #[error("Redis 错误: {0}")]
    Redis(#[from] redis::RedisError),

    // ==================== Kafka 错误 ====================
    #[error("Kafka 错误: {0}")]
    Kafka(String),

    // ==================== 消息错误 ====================
    #[error("序列化失败: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 消息结构不合法（缺少 order_id、未知字段、未知事件类型等），不可重试
    #[error("消息格式错误: {0}")]
    MalformedMessage(String),

    // ==================== 外部服务错误 ====================
    #[error("外部服务错误: {service} - {message}")]
    ExternalService { service: String, message: String },

    // ==================== 配置错误 ====================
    #[error("配置错误: {0}")]
    Config(String),

    // ==================== 通用错误 ====================
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, SagaError>;

impl SagaError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::Redis(_) => "REDIS_ERROR",
            Self::Kafka(_) => "KAFKA_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::MalformedMessage(_) => "MALFORMED_MESSAGE",
            Self::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为可重试错误
    ///
    /// 只有基础设施层的瞬时故障才值得重试；消息格式错误重投多少次都一样。
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Database(e) => is_transient_db_error(e),
            Self::Redis(_) | Self::Kafka(_) | Self::ExternalService { .. } => true,
            _ => false,
        }
    }
}

/// 数据库错误是否为瞬时故障
///
/// 连接层故障（IO、TLS、协议、连接池耗尽或已关闭）可重试；服务端错误只认
/// SQLSTATE 08（连接异常）、40（事务回滚，含序列化失败与死锁）、53（资源不足）、
/// 57（运维干预，如管理员断开）。其余如约束冲突、数值溢出、列解码失败，
/// 重试结果不会改变。
pub fn is_transient_db_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed => true,
        sqlx::Error::Database(db) => db.code().is_some_and(|code| sqlstate_is_transient(&code)),
        _ => false,
    }
}

fn sqlstate_is_transient(code: &str) -> bool {
    matches!(code.get(..2), Some("08" | "40" | "53" | "57"))
}

impl From<config::ConfigError> for SagaError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<rdkafka::error::KafkaError> for SagaError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        Self::Kafka(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let err = SagaError::MalformedMessage("缺少 order_id".to_string());
        assert_eq!(err.code(), "MALFORMED_MESSAGE");
        assert_eq!(err.to_string(), "消息格式错误: 缺少 order_id");

        let err = SagaError::ExternalService {
            service: "exchange-rate-api".to_string(),
            message: "HTTP 503".to_string(),
        };
        assert_eq!(err.code(), "EXTERNAL_SERVICE_ERROR");
        assert_eq!(err.to_string(), "外部服务错误: exchange-rate-api - HTTP 503");
    }

    #[test]
    fn test_is_retryable() {
        let db_err = SagaError::Database(sqlx::Error::PoolTimedOut);
        assert!(db_err.is_retryable());

        let kafka_err = SagaError::Kafka("broker 不可达".to_string());
        assert!(kafka_err.is_retryable());

        let malformed = SagaError::MalformedMessage("缺少 order_id".to_string());
        assert!(!malformed.is_retryable());

        let config_err = SagaError::Config("max_attempts 必须大于 0".to_string());
        assert!(!config_err.is_retryable());

        let missing_row = SagaError::Database(sqlx::Error::RowNotFound);
        assert!(!missing_row.is_retryable());
    }

    #[test]
    fn test_connection_level_db_errors_are_transient() {
        assert!(is_transient_db_error(&sqlx::Error::PoolTimedOut));
        assert!(is_transient_db_error(&sqlx::Error::PoolClosed));
        assert!(is_transient_db_error(&sqlx::Error::Protocol(
            "unexpected message".to_string()
        )));
        assert!(is_transient_db_error(&sqlx::Error::Io(std::io::Error::from(
            std::io::ErrorKind::ConnectionReset
        ))));
    }

    #[test]
    fn test_data_level_db_errors_are_permanent() {
        assert!(!is_transient_db_error(&sqlx::Error::RowNotFound));
        assert!(!is_transient_db_error(&sqlx::Error::ColumnDecode {
            index: "\"total_price\"".to_string(),
            source: "数值超出范围".into(),
        }));
        assert!(!is_transient_db_error(&sqlx::Error::ColumnNotFound(
            "cart_price".to_string()
        )));
    }

    #[test]
    fn test_sqlstate_classes() {
        // 序列化失败、连接中断、连接数耗尽、管理员断开
        for code in ["40001", "40P01", "08006", "53300", "57P01"] {
            assert!(sqlstate_is_transient(code), "{code} 应可重试");
        }
        // 数值溢出、唯一约束、语法错误
        for code in ["22003", "23505", "42601"] {
            assert!(!sqlstate_is_transient(code), "{code} 不应重试");
        }
        assert!(!sqlstate_is_transient(""));
    }
}
