// 聊天会话 API 处理器

use actix_web::{web, HttpResponse, Result as ActixResult};
use chatwise_common::PaginationParams;
use serde::Deserialize;
use utoipa::{IntoParams, OpenApi};
use uuid::Uuid;

use crate::api::extractors::TenantScope;
use crate::api::responses::HttpResponseBuilder;
use crate::services::chat::{
    AssistantReplyRequest, ChatAnalytics, DailyCount, MessageView, PostMessageRequest, SessionQuery, SessionView,
    StartSessionRequest,
};
use crate::state::AppState;

/// 聊天 API 文档
#[derive(OpenApi)]
#[openapi(
    paths(
        start_session,
        list_sessions,
        get_session,
        close_session,
        post_message,
        record_reply,
        list_messages,
        chat_analytics
    ),
    components(schemas(
        StartSessionRequest,
        PostMessageRequest,
        AssistantReplyRequest,
        SessionView,
        MessageView,
        ChatAnalytics,
        DailyCount,
        crate::db::entities::chat_session::SessionStatus,
        crate::db::entities::chat_message::MessageRole,
    ))
)]
pub struct ChatApiDoc;

/// 统计参数
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct AnalyticsQuery {
    /// 统计天数，默认 30
    pub days: Option<i64>,
}

/// 开始会话
#[utoipa::path(
    post,
    path = "/chat/sessions",
    tag = "Chat",
    summary = "开始会话",
    request_body = StartSessionRequest,
    responses(
        (status = 201, description = "会话已创建", body = SessionView),
        (status = 400, description = "请求参数错误")
    ),
    security(("bearer_auth" = []))
)]
pub async fn start_session(
    state: web::Data<AppState>,
    scope: TenantScope,
    request: web::Json<StartSessionRequest>,
) -> ActixResult<HttpResponse> {
    let session = state.chat.start_session(scope.tenant_id, request.into_inner()).await?;
    HttpResponseBuilder::created(SessionView::from(session))
}

/// 会话列表
#[utoipa::path(
    get,
    path = "/chat/sessions",
    tag = "Chat",
    summary = "会话列表",
    params(SessionQuery),
    responses(
        (status = 200, description = "获取成功")
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_sessions(
    state: web::Data<AppState>,
    scope: TenantScope,
    query: web::Query<SessionQuery>,
) -> ActixResult<HttpResponse> {
    let sessions = state.chat.list_sessions(scope.tenant_id, &query).await?;
    HttpResponseBuilder::ok(sessions.map(SessionView::from))
}

/// 会话详情
#[utoipa::path(
    get,
    path = "/chat/sessions/{session_id}",
    tag = "Chat",
    summary = "会话详情",
    params(("session_id" = Uuid, Path, description = "会话 ID")),
    responses(
        (status = 200, description = "获取成功", body = SessionView),
        (status = 404, description = "会话不存在")
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_session(
    state: web::Data<AppState>,
    scope: TenantScope,
    path: web::Path<Uuid>,
) -> ActixResult<HttpResponse> {
    let session = state.chat.get_session(scope.tenant_id, path.into_inner()).await?;
    HttpResponseBuilder::ok(SessionView::from(session))
}

/// 结束会话
#[utoipa::path(
    post,
    path = "/chat/sessions/{session_id}/close",
    tag = "Chat",
    summary = "结束会话",
    params(("session_id" = Uuid, Path, description = "会话 ID")),
    responses(
        (status = 200, description = "会话已结束", body = SessionView),
        (status = 404, description = "会话不存在")
    ),
    security(("bearer_auth" = []))
)]
pub async fn close_session(
    state: web::Data<AppState>,
    scope: TenantScope,
    path: web::Path<Uuid>,
) -> ActixResult<HttpResponse> {
    let session = state.chat.close_session(scope.tenant_id, path.into_inner()).await?;
    HttpResponseBuilder::ok(SessionView::from(session))
}

/// 发送访客消息
#[utoipa::path(
    post,
    path = "/chat/sessions/{session_id}/messages",
    tag = "Chat",
    summary = "发送访客消息",
    params(("session_id" = Uuid, Path, description = "会话 ID")),
    request_body = PostMessageRequest,
    responses(
        (status = 201, description = "消息已记录", body = MessageView),
        (status = 402, description = "消息配额已用尽"),
        (status = 409, description = "会话已结束")
    ),
    security(("bearer_auth" = []))
)]
pub async fn post_message(
    state: web::Data<AppState>,
    scope: TenantScope,
    path: web::Path<Uuid>,
    request: web::Json<PostMessageRequest>,
) -> ActixResult<HttpResponse> {
    let message = state
        .chat
        .post_user_message(scope.tenant_id, path.into_inner(), request.into_inner())
        .await?;
    HttpResponseBuilder::created(MessageView::from(message))
}

/// 记录机器人回复
#[utoipa::path(
    post,
    path = "/chat/sessions/{session_id}/replies",
    tag = "Chat",
    summary = "记录机器人回复",
    description = "由机器人运行时回写生成的回答，并发布 chat.answer.generated",
    params(("session_id" = Uuid, Path, description = "会话 ID")),
    request_body = AssistantReplyRequest,
    responses(
        (status = 201, description = "回复已记录", body = MessageView),
        (status = 409, description = "会话已结束")
    ),
    security(("bearer_auth" = []))
)]
pub async fn record_reply(
    state: web::Data<AppState>,
    scope: TenantScope,
    path: web::Path<Uuid>,
    request: web::Json<AssistantReplyRequest>,
) -> ActixResult<HttpResponse> {
    let message = state
        .chat
        .record_assistant_reply(scope.tenant_id, path.into_inner(), request.into_inner())
        .await?;
    HttpResponseBuilder::created(MessageView::from(message))
}

/// 会话消息
#[utoipa::path(
    get,
    path = "/chat/sessions/{session_id}/messages",
    tag = "Chat",
    summary = "会话消息",
    params(
        ("session_id" = Uuid, Path, description = "会话 ID"),
        ("page" = Option<u64>, Query, description = "页码"),
        ("page_size" = Option<u64>, Query, description = "每页条数")
    ),
    responses(
        (status = 200, description = "获取成功"),
        (status = 404, description = "会话不存在")
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_messages(
    state: web::Data<AppState>,
    scope: TenantScope,
    path: web::Path<Uuid>,
    query: web::Query<PaginationParams>,
) -> ActixResult<HttpResponse> {
    let messages = state.chat.list_messages(scope.tenant_id, path.into_inner(), &query).await?;
    HttpResponseBuilder::ok(messages.map(MessageView::from))
}

/// 聊天统计
#[utoipa::path(
    get,
    path = "/chat/analytics",
    tag = "Chat",
    summary = "聊天统计",
    params(AnalyticsQuery),
    responses(
        (status = 200, description = "获取成功", body = ChatAnalytics)
    ),
    security(("bearer_auth" = []))
)]
pub async fn chat_analytics(
    state: web::Data<AppState>,
    scope: TenantScope,
    query: web::Query<AnalyticsQuery>,
) -> ActixResult<HttpResponse> {
    let analytics = state.chat.analytics(scope.tenant_id, query.days.unwrap_or(30)).await?;
    HttpResponseBuilder::ok(analytics)
}

/// 配置聊天路由
pub fn configure_chat_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/chat")
            .route("/sessions", web::post().to(start_session))
            .route("/sessions", web::get().to(list_sessions))
            .route("/sessions/{session_id}", web::get().to(get_session))
            .route("/sessions/{session_id}/close", web::post().to(close_session))
            .route("/sessions/{session_id}/messages", web::post().to(post_message))
            .route("/sessions/{session_id}/messages", web::get().to(list_messages))
            .route("/sessions/{session_id}/replies", web::post().to(record_reply))
            .route("/analytics", web::get().to(chat_analytics)),
    );
}
