// 回答质量 API 处理器

use actix_web::{web, HttpResponse, Result as ActixResult};
use serde::Deserialize;
use utoipa::{IntoParams, OpenApi};
use uuid::Uuid;

use crate::api::extractors::TenantScope;
use crate::api::responses::HttpResponseBuilder;
use crate::services::quality::{FeedbackRequest, GapQuery, GapResolutionRequest, GapView, QualityReport};
use crate::state::AppState;

/// 质量 API 文档
#[derive(OpenApi)]
#[openapi(
    paths(submit_feedback, list_gaps, resolve_gap, dismiss_gap, quality_report),
    components(schemas(
        FeedbackRequest,
        GapResolutionRequest,
        GapView,
        QualityReport,
        crate::db::entities::knowledge_gap::GapStatus,
    ))
)]
pub struct QualityApiDoc;

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ReportQuery {
    /// 统计天数，默认 30
    pub days: Option<i64>,
}

/// 提交回答反馈
#[utoipa::path(
    post,
    path = "/quality/messages/{message_id}/feedback",
    tag = "Quality",
    summary = "提交回答反馈",
    params(("message_id" = Uuid, Path, description = "助手消息 ID")),
    request_body = FeedbackRequest,
    responses(
        (status = 200, description = "反馈已记录"),
        (status = 400, description = "评分不合法"),
        (status = 404, description = "消息没有质量记录")
    ),
    security(("bearer_auth" = []))
)]
pub async fn submit_feedback(
    state: web::Data<AppState>,
    scope: TenantScope,
    path: web::Path<Uuid>,
    request: web::Json<FeedbackRequest>,
) -> ActixResult<HttpResponse> {
    let metric = state
        .quality
        .submit_feedback(scope.tenant_id, path.into_inner(), request.into_inner())
        .await?;
    HttpResponseBuilder::ok(metric)
}

/// 知识缺口列表
#[utoipa::path(
    get,
    path = "/quality/gaps",
    tag = "Quality",
    summary = "知识缺口列表",
    description = "未处理的缺口在前，按出现次数降序",
    params(GapQuery),
    responses(
        (status = 200, description = "获取成功")
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_gaps(
    state: web::Data<AppState>,
    scope: TenantScope,
    query: web::Query<GapQuery>,
) -> ActixResult<HttpResponse> {
    let gaps = state.quality.list_gaps(scope.tenant_id, &query).await?;
    HttpResponseBuilder::ok(gaps.map(GapView::from))
}

/// 标记缺口已解决
#[utoipa::path(
    post,
    path = "/quality/gaps/{gap_id}/resolve",
    tag = "Quality",
    summary = "标记缺口已解决",
    params(("gap_id" = Uuid, Path, description = "缺口 ID")),
    request_body = GapResolutionRequest,
    responses(
        (status = 200, description = "已解决", body = GapView),
        (status = 404, description = "缺口不存在"),
        (status = 409, description = "缺口已处理")
    ),
    security(("bearer_auth" = []))
)]
pub async fn resolve_gap(
    state: web::Data<AppState>,
    scope: TenantScope,
    path: web::Path<Uuid>,
    request: web::Json<GapResolutionRequest>,
) -> ActixResult<HttpResponse> {
    let gap = state
        .quality
        .resolve_gap(scope.tenant_id, path.into_inner(), request.into_inner().note)
        .await?;
    HttpResponseBuilder::ok(GapView::from(gap))
}

/// 忽略缺口
#[utoipa::path(
    post,
    path = "/quality/gaps/{gap_id}/dismiss",
    tag = "Quality",
    summary = "忽略缺口",
    params(("gap_id" = Uuid, Path, description = "缺口 ID")),
    request_body = GapResolutionRequest,
    responses(
        (status = 200, description = "已忽略", body = GapView),
        (status = 404, description = "缺口不存在"),
        (status = 409, description = "缺口已处理")
    ),
    security(("bearer_auth" = []))
)]
pub async fn dismiss_gap(
    state: web::Data<AppState>,
    scope: TenantScope,
    path: web::Path<Uuid>,
    request: web::Json<GapResolutionRequest>,
) -> ActixResult<HttpResponse> {
    let gap = state
        .quality
        .dismiss_gap(scope.tenant_id, path.into_inner(), request.into_inner().note)
        .await?;
    HttpResponseBuilder::ok(GapView::from(gap))
}

/// 质量报表
#[utoipa::path(
    get,
    path = "/quality/report",
    tag = "Quality",
    summary = "质量报表",
    params(ReportQuery),
    responses(
        (status = 200, description = "获取成功", body = QualityReport)
    ),
    security(("bearer_auth" = []))
)]
pub async fn quality_report(
    state: web::Data<AppState>,
    scope: TenantScope,
    query: web::Query<ReportQuery>,
) -> ActixResult<HttpResponse> {
    let report = state.quality.report(scope.tenant_id, query.days.unwrap_or(30)).await?;
    HttpResponseBuilder::ok(report)
}

/// 配置质量路由
pub fn configure_quality_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/quality")
            .route("/messages/{message_id}/feedback", web::post().to(submit_feedback))
            .route("/gaps", web::get().to(list_gaps))
            .route("/gaps/{gap_id}/resolve", web::post().to(resolve_gap))
            .route("/gaps/{gap_id}/dismiss", web::post().to(dismiss_gap))
            .route("/report", web::get().to(quality_report)),
    );
}
