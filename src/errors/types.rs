// 统一错误类型定义
// 所有服务共享同一个错误枚举，并负责到 HTTP 状态码的映射

use actix_web::{HttpResponse, ResponseError};
use chatwise_common::CommonError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

/// 平台统一错误类型
#[derive(Debug, Error, Serialize, Deserialize)]
#[serde(tag = "error_type", content = "details")]
pub enum PlatformError {
    /// 配置错误
    #[error("配置错误: {message}")]
    Configuration { message: String },

    /// 数据库错误
    #[error("数据库错误: {message}")]
    Database { message: String, code: Option<String> },

    /// 认证错误
    #[error("认证错误: {message}")]
    Authentication { message: String },

    /// 授权错误
    #[error("授权错误: {message}")]
    Authorization { message: String },

    /// 需要付费（订阅不可用或用量超限）
    #[error("需要付费: {message}")]
    PaymentRequired { message: String, metric: Option<String> },

    /// 验证错误
    #[error("验证错误: {field} - {message}")]
    Validation { field: String, message: String },

    /// 资源未找到
    #[error("资源未找到: {resource}")]
    NotFound { resource: String },

    /// 资源冲突
    #[error("资源冲突: {message}")]
    Conflict { message: String },

    /// 限流错误
    #[error("请求过于频繁，请稍后重试")]
    RateLimit { retry_after: Option<u64> },

    /// 外部服务错误
    #[error("外部服务错误: {service} - {message}")]
    ExternalService { service: String, message: String },

    /// 消息代理错误
    #[error("消息代理错误: {message}")]
    Broker { message: String },

    /// 对象存储错误
    #[error("对象存储错误: {message}")]
    Storage { message: String },

    /// 内部服务器错误
    #[error("内部服务器错误: {message}")]
    Internal { message: String },

    /// 服务不可用
    #[error("服务暂时不可用: {message}")]
    ServiceUnavailable { message: String },

    /// 超时错误
    #[error("请求超时: {operation}")]
    Timeout { operation: String },
}

impl PlatformError {
    /// 获取错误代码
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "CONFIGURATION_ERROR",
            Self::Database { .. } => "DATABASE_ERROR",
            Self::Authentication { .. } => "AUTHENTICATION_ERROR",
            Self::Authorization { .. } => "AUTHORIZATION_ERROR",
            Self::PaymentRequired { .. } => "PAYMENT_REQUIRED",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Conflict { .. } => "CONFLICT",
            Self::RateLimit { .. } => "RATE_LIMIT",
            Self::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            Self::Broker { .. } => "BROKER_ERROR",
            Self::Storage { .. } => "STORAGE_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
            Self::ServiceUnavailable { .. } => "SERVICE_UNAVAILABLE",
            Self::Timeout { .. } => "TIMEOUT_ERROR",
        }
    }

    /// 获取 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Configuration { .. } | Self::Database { .. } | Self::Internal { .. } => 500,
            Self::Authentication { .. } => 401,
            Self::PaymentRequired { .. } => 402,
            Self::Authorization { .. } => 403,
            Self::Validation { .. } => 400,
            Self::NotFound { .. } => 404,
            Self::Conflict { .. } => 409,
            Self::RateLimit { .. } => 429,
            Self::ExternalService { .. } | Self::Broker { .. } | Self::Storage { .. } => 502,
            Self::ServiceUnavailable { .. } => 503,
            Self::Timeout { .. } => 408,
        }
    }

    /// 重试是否可能成功；输入类错误重试也不会改变结果
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Validation { .. }
                | Self::NotFound { .. }
                | Self::Authentication { .. }
                | Self::Authorization { .. }
                | Self::PaymentRequired { .. }
                | Self::Conflict { .. }
        )
    }

    /// 是否为客户端错误
    pub fn is_client_error(&self) -> bool {
        matches!(self.status_code(), 400..=499)
    }

    /// 是否为服务器错误
    pub fn is_server_error(&self) -> bool {
        matches!(self.status_code(), 500..=599)
    }

    /// 是否应该记录错误日志
    pub fn should_log(&self) -> bool {
        !matches!(
            self,
            Self::Validation { .. }
                | Self::NotFound { .. }
                | Self::Authentication { .. }
                | Self::PaymentRequired { .. }
        )
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::Database { message: message.into(), code: None }
    }

    pub fn database_with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            code: Some(code.into()),
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication { message: message.into() }
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        Self::Authorization { message: message.into() }
    }

    /// 订阅不可用
    pub fn payment_required(message: impl Into<String>) -> Self {
        Self::PaymentRequired { message: message.into(), metric: None }
    }

    /// 某项用量超出套餐限制
    pub fn usage_limit(metric: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PaymentRequired {
            message: message.into(),
            metric: Some(metric.into()),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound { resource: resource.into() }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict { message: message.into() }
    }

    pub fn rate_limit(retry_after: Option<u64>) -> Self {
        Self::RateLimit { retry_after }
    }

    pub fn external_service(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalService {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn broker(message: impl Into<String>) -> Self {
        Self::Broker { message: message.into() }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage { message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable { message: message.into() }
    }

    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout { operation: operation.into() }
    }
}

/// 服务层统一返回类型
pub type PlatformResult<T> = Result<T, PlatformError>;

impl ResponseError for PlatformError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        actix_web::http::StatusCode::from_u16(PlatformError::status_code(self))
            .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        if self.should_log() {
            error!(
                error_code = %self.error_code(),
                error_message = %self,
                "处理请求时发生错误"
            );
        }

        crate::errors::ErrorResponse::from_error(self).into_http_response()
    }
}

impl From<CommonError> for PlatformError {
    fn from(err: CommonError) -> Self {
        match err {
            CommonError::Validation { message } => Self::validation("general", message),
            CommonError::Permission { message } => Self::authorization(message),
            CommonError::NotFound { resource } => Self::not_found(resource),
            CommonError::Configuration { message } => Self::configuration(message),
            CommonError::ExternalService { service, message } => {
                Self::external_service(service, message)
            }
            CommonError::Internal { message } => Self::internal(message),
        }
    }
}

impl From<sea_orm::DbErr> for PlatformError {
    fn from(err: sea_orm::DbErr) -> Self {
        match err {
            sea_orm::DbErr::ConnectionAcquire(_) => Self::database("无法获取数据库连接"),
            sea_orm::DbErr::RecordNotFound(resource) => Self::not_found(resource),
            sea_orm::DbErr::Conn(msg) => Self::database(format!("数据库连接错误: {}", msg)),
            sea_orm::DbErr::Exec(msg) => Self::database(format!("数据库执行错误: {}", msg)),
            sea_orm::DbErr::Query(msg) => Self::database(format!("数据库查询错误: {}", msg)),
            _ => Self::database(format!("数据库错误: {}", err)),
        }
    }
}

impl From<config::ConfigError> for PlatformError {
    fn from(err: config::ConfigError) -> Self {
        Self::configuration(format!("配置加载错误: {}", err))
    }
}

impl From<std::io::Error> for PlatformError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::not_found("文件或目录"),
            std::io::ErrorKind::TimedOut => Self::timeout("IO 操作"),
            _ => Self::internal(format!("IO 错误: {}", err)),
        }
    }
}

impl From<serde_json::Error> for PlatformError {
    fn from(err: serde_json::Error) -> Self {
        Self::validation("json", format!("JSON 解析错误: {}", err))
    }
}

impl From<uuid::Error> for PlatformError {
    fn from(err: uuid::Error) -> Self {
        Self::validation("uuid", format!("UUID 格式错误: {}", err))
    }
}

impl From<reqwest::Error> for PlatformError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout("外部 HTTP 调用")
        } else {
            Self::external_service("http", err.to_string())
        }
    }
}

impl From<lapin::Error> for PlatformError {
    fn from(err: lapin::Error) -> Self {
        Self::broker(err.to_string())
    }
}
