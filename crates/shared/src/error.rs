//! 统一错误处理模块
//!
//! 定义各服务共享的基础设施错误，使用 thiserror 提供良好的错误信息。
//! 业务错误由各服务在此基础上自行扩展。

use thiserror::Error;

/// 系统错误类型
#[derive(Debug, Error)]
pub enum LoyaltyError {
    // ==================== 数据库错误 ====================
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    // ==================== 配置错误 ====================
    #[error("配置错误: {0}")]
    Config(#[from] config::ConfigError),

    // ==================== 外部服务错误 ====================
    #[error("外部服务错误: {service} - {message}")]
    ExternalService { service: String, message: String },

    // ==================== 通用错误 ====================
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, LoyaltyError>;

impl LoyaltyError {
    /// 获取错误码，同时用作指标标签
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let err = LoyaltyError::ExternalService {
            service: "accrual".to_string(),
            message: "tls init failed".to_string(),
        };
        assert_eq!(err.code(), "EXTERNAL_SERVICE_ERROR");
        assert_eq!(err.to_string(), "外部服务错误: accrual - tls init failed");

        let db_err = LoyaltyError::Database(sqlx::Error::PoolTimedOut);
        assert_eq!(db_err.code(), "DATABASE_ERROR");
    }

    #[test]
    fn test_config_error_conversion() {
        let err: LoyaltyError = config::ConfigError::Message("bad".to_string()).into();
        assert_eq!(err.code(), "CONFIG_ERROR");
        assert_eq!(err.to_string(), "配置错误: bad");
    }
}
