// 入驻 API 处理器
// 租户注册、文档上传与摄取任务

use actix_multipart::Multipart;
use actix_web::{web, HttpResponse, Result as ActixResult};
use chatwise_common::PaginationParams;
use futures::StreamExt;
use tracing::info;
use utoipa::OpenApi;
use uuid::Uuid;

use crate::api::extractors::{AdminUser, TenantScope};
use crate::api::responses::HttpResponseBuilder;
use crate::errors::PlatformError;
use crate::services::auth::AuthenticatedUser;
use crate::services::onboarding::{
    DocumentView, IngestionJobView, JobQuery, JobStatusUpdate, RegisterTenantRequest, TenantOwner, TenantView,
    UpdateTenantRequest, UploadResponse, UrlIngestionRequest,
};
use crate::state::AppState;

/// 入驻 API 文档
#[derive(OpenApi)]
#[openapi(
    paths(
        register_tenant,
        list_tenants,
        get_tenant,
        update_tenant,
        suspend_tenant,
        activate_tenant,
        upload_document,
        list_documents,
        get_document,
        delete_document,
        ingest_url,
        list_jobs,
        get_job,
        update_job_status
    ),
    components(schemas(
        RegisterTenantRequest,
        UpdateTenantRequest,
        TenantView,
        DocumentView,
        IngestionJobView,
        UploadResponse,
        UrlIngestionRequest,
        JobStatusUpdate,
        crate::db::entities::tenant::TenantStatus,
        crate::db::entities::document::DocumentStatus,
        crate::db::entities::ingestion_job::JobStatus,
        crate::db::entities::ingestion_job::SourceType,
    ))
)]
pub struct OnboardingApiDoc;

/// 上传文件中的文件内容
struct UploadedFile {
    file_name: String,
    content_type: Option<String>,
    bytes: Vec<u8>,
}

/// 读取 `file` 字段；超过上限时立即拒绝
async fn read_upload(mut payload: Multipart, max_size: u64) -> ActixResult<UploadedFile> {
    let mut upload = None;

    while let Some(field) = payload.next().await {
        let mut field = field?;
        if field.name() != "file" {
            while let Some(chunk) = field.next().await {
                chunk?;
            }
            continue;
        }

        let file_name = field
            .content_disposition()
            .get_filename()
            .map(str::to_string)
            .ok_or_else(|| PlatformError::validation("file", "缺少文件名"))?;
        let content_type = field.content_type().map(|ct| ct.to_string());

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            bytes.extend_from_slice(&chunk?);
            if bytes.len() as u64 > max_size {
                return Err(PlatformError::validation("file", format!("文件大小超过上限 {} 字节", max_size)).into());
            }
        }

        upload = Some(UploadedFile {
            file_name,
            content_type,
            bytes,
        });
    }

    upload.ok_or_else(|| PlatformError::validation("file", "缺少文件").into())
}

/// 注册租户
#[utoipa::path(
    post,
    path = "/onboarding/tenants",
    tag = "Onboarding",
    summary = "注册租户",
    description = "当前用户成为租户所有者",
    request_body = RegisterTenantRequest,
    responses(
        (status = 201, description = "注册成功", body = TenantView),
        (status = 400, description = "标识符或邮箱不合法"),
        (status = 409, description = "标识符已被占用")
    ),
    security(("bearer_auth" = []))
)]
pub async fn register_tenant(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    request: web::Json<RegisterTenantRequest>,
) -> ActixResult<HttpResponse> {
    let owner = TenantOwner {
        user_id: Uuid::parse_str(&user.user_id)
            .map_err(|_| PlatformError::validation("sub", "令牌主体不是合法的用户 ID"))?,
        email: user.email.clone(),
    };

    let tenant = state.tenants.register(request.into_inner(), owner).await?;
    info!(tenant_id = %tenant.id, user_id = %user.user_id, "租户已注册");
    HttpResponseBuilder::created(TenantView::from(tenant))
}

/// 租户列表
#[utoipa::path(
    get,
    path = "/onboarding/tenants",
    tag = "Onboarding",
    summary = "租户列表",
    params(
        ("page" = Option<u64>, Query, description = "页码"),
        ("page_size" = Option<u64>, Query, description = "每页条数")
    ),
    responses(
        (status = 200, description = "获取成功"),
        (status = 403, description = "权限不足")
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_tenants(
    state: web::Data<AppState>,
    _admin: AdminUser,
    query: web::Query<PaginationParams>,
) -> ActixResult<HttpResponse> {
    let tenants = state.tenants.list(&query).await?;
    HttpResponseBuilder::ok(tenants.map(TenantView::from))
}

/// 租户详情
#[utoipa::path(
    get,
    path = "/onboarding/tenants/{tenant_id}",
    tag = "Onboarding",
    summary = "租户详情",
    params(("tenant_id" = Uuid, Path, description = "租户 ID")),
    responses(
        (status = 200, description = "获取成功", body = TenantView),
        (status = 403, description = "无权访问该租户"),
        (status = 404, description = "租户不存在")
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_tenant(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    path: web::Path<Uuid>,
) -> ActixResult<HttpResponse> {
    let tenant_id = path.into_inner();
    user.ensure_tenant_access(tenant_id)?;
    let tenant = state.tenants.get(tenant_id).await?;
    HttpResponseBuilder::ok(TenantView::from(tenant))
}

/// 更新租户
#[utoipa::path(
    put,
    path = "/onboarding/tenants/{tenant_id}",
    tag = "Onboarding",
    summary = "更新租户",
    params(("tenant_id" = Uuid, Path, description = "租户 ID")),
    request_body = UpdateTenantRequest,
    responses(
        (status = 200, description = "更新成功", body = TenantView),
        (status = 403, description = "无权访问该租户"),
        (status = 404, description = "租户不存在")
    ),
    security(("bearer_auth" = []))
)]
pub async fn update_tenant(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    path: web::Path<Uuid>,
    request: web::Json<UpdateTenantRequest>,
) -> ActixResult<HttpResponse> {
    let tenant_id = path.into_inner();
    user.ensure_tenant_access(tenant_id)?;
    let tenant = state.tenants.update(tenant_id, request.into_inner()).await?;
    HttpResponseBuilder::ok(TenantView::from(tenant))
}

/// 暂停租户
#[utoipa::path(
    post,
    path = "/onboarding/tenants/{tenant_id}/suspend",
    tag = "Onboarding",
    summary = "暂停租户",
    params(("tenant_id" = Uuid, Path, description = "租户 ID")),
    responses(
        (status = 200, description = "已暂停", body = TenantView),
        (status = 403, description = "权限不足"),
        (status = 404, description = "租户不存在")
    ),
    security(("bearer_auth" = []))
)]
pub async fn suspend_tenant(
    state: web::Data<AppState>,
    _admin: AdminUser,
    path: web::Path<Uuid>,
) -> ActixResult<HttpResponse> {
    let tenant = state.tenants.suspend(path.into_inner()).await?;
    HttpResponseBuilder::ok(TenantView::from(tenant))
}

/// 恢复租户
#[utoipa::path(
    post,
    path = "/onboarding/tenants/{tenant_id}/activate",
    tag = "Onboarding",
    summary = "恢复租户",
    params(("tenant_id" = Uuid, Path, description = "租户 ID")),
    responses(
        (status = 200, description = "已恢复", body = TenantView),
        (status = 403, description = "权限不足"),
        (status = 404, description = "租户不存在")
    ),
    security(("bearer_auth" = []))
)]
pub async fn activate_tenant(
    state: web::Data<AppState>,
    _admin: AdminUser,
    path: web::Path<Uuid>,
) -> ActixResult<HttpResponse> {
    let tenant = state.tenants.activate(path.into_inner()).await?;
    HttpResponseBuilder::ok(TenantView::from(tenant))
}

/// 上传文档
#[utoipa::path(
    post,
    path = "/onboarding/documents",
    tag = "Onboarding",
    summary = "上传文档",
    description = "保存到对象存储并创建摄取任务",
    request_body(content = String, description = "文档文件（字段名 file）", content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "上传成功", body = UploadResponse),
        (status = 400, description = "文件类型或大小不合法"),
        (status = 402, description = "文档或存储配额已用尽")
    ),
    security(("bearer_auth" = []))
)]
pub async fn upload_document(
    state: web::Data<AppState>,
    scope: TenantScope,
    payload: Multipart,
) -> ActixResult<HttpResponse> {
    let file = read_upload(payload, state.config.storage.max_file_size).await?;
    let (document, job) = state
        .ingestion
        .upload_document(scope.tenant_id, &file.file_name, file.content_type, file.bytes)
        .await?;

    HttpResponseBuilder::created(UploadResponse {
        document: DocumentView::from(document),
        job: IngestionJobView::from(job),
    })
}

/// 文档列表
#[utoipa::path(
    get,
    path = "/onboarding/documents",
    tag = "Onboarding",
    summary = "文档列表",
    params(
        ("page" = Option<u64>, Query, description = "页码"),
        ("page_size" = Option<u64>, Query, description = "每页条数")
    ),
    responses(
        (status = 200, description = "获取成功")
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_documents(
    state: web::Data<AppState>,
    scope: TenantScope,
    query: web::Query<PaginationParams>,
) -> ActixResult<HttpResponse> {
    let documents = state.ingestion.list_documents(scope.tenant_id, &query).await?;
    HttpResponseBuilder::ok(documents.map(DocumentView::from))
}

/// 文档详情
#[utoipa::path(
    get,
    path = "/onboarding/documents/{document_id}",
    tag = "Onboarding",
    summary = "文档详情",
    params(("document_id" = Uuid, Path, description = "文档 ID")),
    responses(
        (status = 200, description = "获取成功", body = DocumentView),
        (status = 404, description = "文档不存在")
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_document(
    state: web::Data<AppState>,
    scope: TenantScope,
    path: web::Path<Uuid>,
) -> ActixResult<HttpResponse> {
    let document = state.ingestion.get_document(scope.tenant_id, path.into_inner()).await?;
    HttpResponseBuilder::ok(DocumentView::from(document))
}

/// 删除文档
#[utoipa::path(
    delete,
    path = "/onboarding/documents/{document_id}",
    tag = "Onboarding",
    summary = "删除文档",
    params(("document_id" = Uuid, Path, description = "文档 ID")),
    responses(
        (status = 200, description = "已删除", body = DocumentView),
        (status = 404, description = "文档不存在")
    ),
    security(("bearer_auth" = []))
)]
pub async fn delete_document(
    state: web::Data<AppState>,
    scope: TenantScope,
    path: web::Path<Uuid>,
) -> ActixResult<HttpResponse> {
    let document = state.ingestion.delete_document(scope.tenant_id, path.into_inner()).await?;
    HttpResponseBuilder::ok(DocumentView::from(document))
}

/// 摄取网页
#[utoipa::path(
    post,
    path = "/onboarding/ingestion/url",
    tag = "Onboarding",
    summary = "摄取网页",
    request_body = UrlIngestionRequest,
    responses(
        (status = 202, description = "任务已排队", body = IngestionJobView),
        (status = 400, description = "地址不合法")
    ),
    security(("bearer_auth" = []))
)]
pub async fn ingest_url(
    state: web::Data<AppState>,
    scope: TenantScope,
    request: web::Json<UrlIngestionRequest>,
) -> ActixResult<HttpResponse> {
    let job = state.ingestion.ingest_url(scope.tenant_id, &request.url).await?;
    HttpResponseBuilder::accepted(IngestionJobView::from(job))
}

/// 摄取任务列表
#[utoipa::path(
    get,
    path = "/onboarding/jobs",
    tag = "Onboarding",
    summary = "摄取任务列表",
    params(JobQuery),
    responses(
        (status = 200, description = "获取成功")
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_jobs(
    state: web::Data<AppState>,
    scope: TenantScope,
    query: web::Query<JobQuery>,
) -> ActixResult<HttpResponse> {
    let jobs = state.ingestion.list_jobs(scope.tenant_id, &query).await?;
    HttpResponseBuilder::ok(jobs.map(IngestionJobView::from))
}

/// 摄取任务详情
#[utoipa::path(
    get,
    path = "/onboarding/jobs/{job_id}",
    tag = "Onboarding",
    summary = "摄取任务详情",
    params(("job_id" = Uuid, Path, description = "任务 ID")),
    responses(
        (status = 200, description = "获取成功", body = IngestionJobView),
        (status = 404, description = "任务不存在")
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_job(
    state: web::Data<AppState>,
    scope: TenantScope,
    path: web::Path<Uuid>,
) -> ActixResult<HttpResponse> {
    let job = state.ingestion.get_job(scope.tenant_id, path.into_inner()).await?;
    HttpResponseBuilder::ok(IngestionJobView::from(job))
}

/// 回报任务状态
#[utoipa::path(
    put,
    path = "/onboarding/jobs/{job_id}/status",
    tag = "Onboarding",
    summary = "回报任务状态",
    description = "由摄取 worker 调用：QUEUED → RUNNING → COMPLETED | FAILED",
    params(("job_id" = Uuid, Path, description = "任务 ID")),
    request_body = JobStatusUpdate,
    responses(
        (status = 200, description = "状态已更新", body = IngestionJobView),
        (status = 404, description = "任务不存在"),
        (status = 409, description = "非法的状态变更")
    ),
    security(("bearer_auth" = []))
)]
pub async fn update_job_status(
    state: web::Data<AppState>,
    scope: TenantScope,
    path: web::Path<Uuid>,
    request: web::Json<JobStatusUpdate>,
) -> ActixResult<HttpResponse> {
    let job = state
        .ingestion
        .update_job_status(scope.tenant_id, path.into_inner(), request.into_inner())
        .await?;
    HttpResponseBuilder::ok(IngestionJobView::from(job))
}

/// 配置入驻路由
pub fn configure_onboarding_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/onboarding")
            .route("/tenants", web::post().to(register_tenant))
            .route("/tenants", web::get().to(list_tenants))
            .route("/tenants/{tenant_id}", web::get().to(get_tenant))
            .route("/tenants/{tenant_id}", web::put().to(update_tenant))
            .route("/tenants/{tenant_id}/suspend", web::post().to(suspend_tenant))
            .route("/tenants/{tenant_id}/activate", web::post().to(activate_tenant))
            .route("/documents", web::post().to(upload_document))
            .route("/documents", web::get().to(list_documents))
            .route("/documents/{document_id}", web::get().to(get_document))
            .route("/documents/{document_id}", web::delete().to(delete_document))
            .route("/ingestion/url", web::post().to(ingest_url))
            .route("/jobs", web::get().to(list_jobs))
            .route("/jobs/{job_id}", web::get().to(get_job))
            .route("/jobs/{job_id}/status", web::put().to(update_job_status)),
    );
}
