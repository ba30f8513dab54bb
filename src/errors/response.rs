// 错误响应格式化

use crate::errors::PlatformError;
use actix_web::HttpResponse;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 错误响应结构
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetail,
    pub timestamp: DateTime<Utc>,
    pub request_id: Option<String>,
    #[serde(skip)]
    status: u16,
}

/// 错误详情
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub retry_after: Option<u64>,
}

impl ErrorResponse {
    /// 从 PlatformError 创建错误响应
    pub fn from_error(error: &PlatformError) -> Self {
        let mut details = None;
        let mut retry_after = None;

        match error {
            PlatformError::Database { code: Some(code), .. } => {
                details = Some(serde_json::json!({ "database_code": code }));
            }
            PlatformError::Validation { field, .. } => {
                details = Some(serde_json::json!({ "field": field }));
            }
            PlatformError::PaymentRequired { metric: Some(metric), .. } => {
                details = Some(serde_json::json!({ "metric": metric }));
            }
            PlatformError::RateLimit { retry_after: ra } => {
                retry_after = *ra;
            }
            PlatformError::ExternalService { service, .. } => {
                details = Some(serde_json::json!({ "service": service }));
            }
            PlatformError::Timeout { operation } => {
                details = Some(serde_json::json!({ "operation": operation }));
            }
            _ => {}
        }

        Self {
            success: false,
            error: ErrorDetail {
                code: error.error_code().to_string(),
                message: error.to_string(),
                details,
                retry_after,
            },
            timestamp: Utc::now(),
            request_id: None,
            status: error.status_code(),
        }
    }

    /// 设置请求 ID
    pub fn with_request_id(mut self, request_id: String) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// HTTP 状态码
    pub fn status(&self) -> u16 {
        self.status
    }

    /// 转换为 HTTP 响应
    pub fn into_http_response(self) -> HttpResponse {
        let mut response = HttpResponse::build(
            actix_web::http::StatusCode::from_u16(self.status)
                .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR),
        );

        if let Some(retry_after) = self.error.retry_after {
            response.insert_header(("Retry-After", retry_after.to_string()));
        }

        if let Some(ref request_id) = self.request_id {
            response.insert_header(("X-Request-ID", request_id.clone()));
        }

        response.json(self)
    }
}
