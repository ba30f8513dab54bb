// API 响应构建
// 成功响应统一包装为 ApiResponse，错误由 PlatformError 渲染

use actix_web::{HttpResponse, Result as ActixResult};
use chatwise_common::ApiResponse;
use serde::Serialize;

/// HTTP 响应构建器
pub struct HttpResponseBuilder;

impl HttpResponseBuilder {
    /// 创建 200 OK 响应
    pub fn ok<T: Serialize>(data: T) -> ActixResult<HttpResponse> {
        Ok(HttpResponse::Ok().json(ApiResponse::success(data)))
    }

    /// 创建 201 Created 响应
    pub fn created<T: Serialize>(data: T) -> ActixResult<HttpResponse> {
        Ok(HttpResponse::Created().json(ApiResponse::success(data)))
    }

    /// 创建 202 Accepted 响应
    pub fn accepted<T: Serialize>(data: T) -> ActixResult<HttpResponse> {
        Ok(HttpResponse::Accepted().json(ApiResponse::success(data)))
    }

    /// 创建 204 No Content 响应
    pub fn no_content() -> ActixResult<HttpResponse> {
        Ok(HttpResponse::NoContent().finish())
    }
}
