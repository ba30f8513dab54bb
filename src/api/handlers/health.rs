// 健康检查处理器

use actix_web::{http::StatusCode, web, HttpResponse, Result as ActixResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::{OpenApi, ToSchema};

use crate::db::check_health;
use crate::state::AppState;

/// 健康检查 API 文档
#[derive(OpenApi)]
#[openapi(
    paths(health_check, readiness_check),
    components(schemas(HealthResponse, HealthStatus, DependencyHealth))
)]
pub struct HealthApiDoc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DependencyHealth {
    pub name: String,
    pub status: HealthStatus,
    pub response_time_ms: Option<u64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub services: Vec<String>,
    pub dependencies: Vec<DependencyHealth>,
}

/// 数据库不可用为不健康；消息代理不可用仅降级
pub fn overall_status(dependencies: &[DependencyHealth]) -> HealthStatus {
    let status_of = |name: &str| {
        dependencies
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.status)
            .unwrap_or(HealthStatus::Healthy)
    };

    if status_of("database") == HealthStatus::Unhealthy {
        HealthStatus::Unhealthy
    } else if dependencies.iter().any(|d| d.status != HealthStatus::Healthy) {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

/// 存活检查
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    summary = "存活检查",
    responses(
        (status = 200, description = "服务存活")
    )
)]
pub async fn health_check() -> ActixResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "chatwise",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
    })))
}

/// 就绪检查
#[utoipa::path(
    get,
    path = "/ready",
    tag = "Health",
    summary = "就绪检查",
    description = "检查数据库与消息代理",
    responses(
        (status = 200, description = "服务就绪", body = HealthResponse),
        (status = 503, description = "数据库不可用", body = HealthResponse)
    )
)]
pub async fn readiness_check(state: web::Data<AppState>) -> ActixResult<HttpResponse> {
    let db = check_health(&state.db).await;
    let broker_healthy = state.broker.is_healthy().await;

    let dependencies = vec![
        DependencyHealth {
            name: "database".to_string(),
            status: if db.healthy { HealthStatus::Healthy } else { HealthStatus::Unhealthy },
            response_time_ms: Some(db.response_time_ms),
            error: db.error_message,
        },
        DependencyHealth {
            name: "broker".to_string(),
            status: if broker_healthy { HealthStatus::Healthy } else { HealthStatus::Degraded },
            response_time_ms: None,
            error: None,
        },
    ];

    let response = HealthResponse {
        status: overall_status(&dependencies),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        services: state.config.services.enabled.iter().map(|s| s.as_str().to_string()).collect(),
        dependencies,
    };

    let code = match response.status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    Ok(HttpResponse::build(code).json(response))
}

/// 配置健康检查路由
pub fn configure_health_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .route("/ready", web::get().to(readiness_check));
}
