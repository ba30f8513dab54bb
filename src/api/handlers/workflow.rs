// 工作流 API 处理器

use actix_web::{web, HttpResponse, Result as ActixResult};
use utoipa::OpenApi;
use uuid::Uuid;

use crate::api::extractors::TenantScope;
use crate::api::responses::HttpResponseBuilder;
use crate::services::auth::AuthenticatedUser;
use crate::services::workflow::{ExecutionQuery, ExecutionView, StartWorkflowRequest, WorkflowDefinition, WorkflowStep};
use crate::state::AppState;

/// 工作流 API 文档
#[derive(OpenApi)]
#[openapi(
    paths(list_definitions, start_execution, list_executions, get_execution, cancel_execution, retry_execution),
    components(schemas(
        WorkflowDefinition,
        WorkflowStep,
        StartWorkflowRequest,
        ExecutionView,
        crate::db::entities::workflow_execution::ExecutionStatus,
    ))
)]
pub struct WorkflowApiDoc;

/// 工作流定义
#[utoipa::path(
    get,
    path = "/workflows/definitions",
    tag = "Workflow",
    summary = "工作流定义",
    responses(
        (status = 200, description = "获取成功", body = [WorkflowDefinition])
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_definitions(state: web::Data<AppState>, _user: AuthenticatedUser) -> ActixResult<HttpResponse> {
    HttpResponseBuilder::ok(state.workflows.registry().definitions())
}

/// 启动工作流
#[utoipa::path(
    post,
    path = "/workflows/executions",
    tag = "Workflow",
    summary = "启动工作流",
    description = "创建执行并按顺序运行全部步骤",
    request_body = StartWorkflowRequest,
    responses(
        (status = 201, description = "执行已结束（完成或失败）", body = ExecutionView),
        (status = 400, description = "输入必须是 JSON 对象"),
        (status = 404, description = "工作流不存在")
    ),
    security(("bearer_auth" = []))
)]
pub async fn start_execution(
    state: web::Data<AppState>,
    scope: TenantScope,
    request: web::Json<StartWorkflowRequest>,
) -> ActixResult<HttpResponse> {
    let request = request.into_inner();
    let execution = state
        .workflows
        .start(scope.tenant_id, &request.workflow_key, request.input, None)
        .await?;
    HttpResponseBuilder::created(ExecutionView::from(execution))
}

/// 执行列表
#[utoipa::path(
    get,
    path = "/workflows/executions",
    tag = "Workflow",
    summary = "执行列表",
    params(ExecutionQuery),
    responses(
        (status = 200, description = "获取成功")
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_executions(
    state: web::Data<AppState>,
    scope: TenantScope,
    query: web::Query<ExecutionQuery>,
) -> ActixResult<HttpResponse> {
    let executions = state.workflows.list(scope.tenant_id, &query).await?;
    HttpResponseBuilder::ok(executions.map(ExecutionView::from))
}

/// 执行详情
#[utoipa::path(
    get,
    path = "/workflows/executions/{execution_id}",
    tag = "Workflow",
    summary = "执行详情",
    params(("execution_id" = Uuid, Path, description = "执行 ID")),
    responses(
        (status = 200, description = "获取成功", body = ExecutionView),
        (status = 404, description = "执行不存在")
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_execution(
    state: web::Data<AppState>,
    scope: TenantScope,
    path: web::Path<Uuid>,
) -> ActixResult<HttpResponse> {
    let execution = state.workflows.get(scope.tenant_id, path.into_inner()).await?;
    HttpResponseBuilder::ok(ExecutionView::from(execution))
}

/// 取消执行
#[utoipa::path(
    post,
    path = "/workflows/executions/{execution_id}/cancel",
    tag = "Workflow",
    summary = "取消执行",
    params(("execution_id" = Uuid, Path, description = "执行 ID")),
    responses(
        (status = 200, description = "已取消", body = ExecutionView),
        (status = 404, description = "执行不存在"),
        (status = 409, description = "执行已结束")
    ),
    security(("bearer_auth" = []))
)]
pub async fn cancel_execution(
    state: web::Data<AppState>,
    scope: TenantScope,
    path: web::Path<Uuid>,
) -> ActixResult<HttpResponse> {
    let execution = state.workflows.cancel(scope.tenant_id, path.into_inner()).await?;
    HttpResponseBuilder::ok(ExecutionView::from(execution))
}

/// 重试失败的执行
#[utoipa::path(
    post,
    path = "/workflows/executions/{execution_id}/retry",
    tag = "Workflow",
    summary = "重试执行",
    description = "仅限失败的执行，从失败的步骤继续，次数受 max_attempts 限制",
    params(("execution_id" = Uuid, Path, description = "执行 ID")),
    responses(
        (status = 200, description = "重试已结束", body = ExecutionView),
        (status = 404, description = "执行不存在"),
        (status = 409, description = "执行未失败或重试次数已用尽")
    ),
    security(("bearer_auth" = []))
)]
pub async fn retry_execution(
    state: web::Data<AppState>,
    scope: TenantScope,
    path: web::Path<Uuid>,
) -> ActixResult<HttpResponse> {
    let execution = state.workflows.retry(scope.tenant_id, path.into_inner()).await?;
    HttpResponseBuilder::ok(ExecutionView::from(execution))
}

/// 配置工作流路由
pub fn configure_workflow_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/workflows")
            .route("/definitions", web::get().to(list_definitions))
            .route("/executions", web::post().to(start_execution))
            .route("/executions", web::get().to(list_executions))
            .route("/executions/{execution_id}", web::get().to(get_execution))
            .route("/executions/{execution_id}/cancel", web::post().to(cancel_execution))
            .route("/executions/{execution_id}/retry", web::post().to(retry_execution)),
    );
}
