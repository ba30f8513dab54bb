// 通信 API 处理器

use actix_web::{web, HttpResponse, Result as ActixResult};
use utoipa::OpenApi;
use uuid::Uuid;

use crate::api::extractors::{AdminUser, TenantScope};
use crate::api::responses::HttpResponseBuilder;
use crate::services::communications::{EmailTemplate, LogQuery, NotificationLogView, RetrySummary, SendEmailRequest};
use crate::state::AppState;

/// 通信 API 文档
#[derive(OpenApi)]
#[openapi(
    paths(send_email, list_logs, get_log, retry_failed),
    components(schemas(
        SendEmailRequest,
        EmailTemplate,
        NotificationLogView,
        RetrySummary,
        crate::db::entities::notification_log::NotificationStatus,
    ))
)]
pub struct CommunicationsApiDoc;

/// 发送事务邮件
#[utoipa::path(
    post,
    path = "/communications/emails",
    tag = "Communications",
    summary = "发送事务邮件",
    description = "相同幂等键最多发送成功一次；投递失败记录在日志中，由定时任务重发",
    request_body = SendEmailRequest,
    responses(
        (status = 200, description = "已处理", body = NotificationLogView),
        (status = 400, description = "收件人或模板变量不合法")
    ),
    security(("bearer_auth" = []))
)]
pub async fn send_email(
    state: web::Data<AppState>,
    scope: TenantScope,
    request: web::Json<SendEmailRequest>,
) -> ActixResult<HttpResponse> {
    let mut request = request.into_inner();
    request.tenant_id = Some(scope.tenant_id);

    let log = state.notifications.send(request).await?;
    HttpResponseBuilder::ok(NotificationLogView::from(log))
}

/// 通知日志
#[utoipa::path(
    get,
    path = "/communications/logs",
    tag = "Communications",
    summary = "通知日志",
    params(LogQuery),
    responses(
        (status = 200, description = "获取成功")
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_logs(
    state: web::Data<AppState>,
    scope: TenantScope,
    query: web::Query<LogQuery>,
) -> ActixResult<HttpResponse> {
    let logs = state.notifications.list_logs(scope.tenant_id, &query).await?;
    HttpResponseBuilder::ok(logs.map(NotificationLogView::from))
}

/// 通知日志详情
#[utoipa::path(
    get,
    path = "/communications/logs/{log_id}",
    tag = "Communications",
    summary = "通知日志详情",
    params(("log_id" = Uuid, Path, description = "日志 ID")),
    responses(
        (status = 200, description = "获取成功", body = NotificationLogView),
        (status = 404, description = "日志不存在")
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_log(
    state: web::Data<AppState>,
    scope: TenantScope,
    path: web::Path<Uuid>,
) -> ActixResult<HttpResponse> {
    let log = state.notifications.get_log(scope.tenant_id, path.into_inner()).await?;
    HttpResponseBuilder::ok(NotificationLogView::from(log))
}

/// 立即重发失败邮件
#[utoipa::path(
    post,
    path = "/communications/retry",
    tag = "Communications",
    summary = "重发失败邮件",
    responses(
        (status = 200, description = "重发完成", body = RetrySummary),
        (status = 403, description = "权限不足")
    ),
    security(("bearer_auth" = []))
)]
pub async fn retry_failed(state: web::Data<AppState>, _admin: AdminUser) -> ActixResult<HttpResponse> {
    let summary = state.notifications.retry_failed().await?;
    HttpResponseBuilder::ok(summary)
}

/// 配置通信路由
pub fn configure_communications_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/communications")
            .route("/emails", web::post().to(send_email))
            .route("/logs", web::get().to(list_logs))
            .route("/logs/{log_id}", web::get().to(get_log))
            .route("/retry", web::post().to(retry_failed)),
    );
}
