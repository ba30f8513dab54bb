// 计费 API 处理器

use actix_web::{web, HttpResponse, Result as ActixResult};
use chatwise_common::PaginationParams;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use utoipa::{IntoParams, OpenApi};
use uuid::Uuid;

use crate::api::extractors::{AdminUser, TenantScope};
use crate::api::responses::HttpResponseBuilder;
use crate::errors::PlatformError;
use crate::services::auth::AuthenticatedUser;
use crate::services::billing::{
    CancelSubscriptionRequest, ChangePlanRequest, CheckoutRequest, CheckoutResponse, CreatePlanRequest, InvoiceView,
    LimitCheck, PaymentView, PlanView, RevenueSummary, SubscriptionView, UpdatePlanRequest, UsageCounters, UsageMetric,
    UsageSummary,
};
use crate::state::AppState;

/// 计费 API 文档
#[derive(OpenApi)]
#[openapi(
    paths(
        list_plans,
        create_plan,
        get_plan,
        update_plan,
        deactivate_plan,
        get_subscription,
        cancel_subscription,
        change_plan,
        get_usage,
        checkout,
        list_payments,
        verify_payment,
        list_invoices,
        get_invoice,
        void_invoice,
        revenue_summary
    ),
    components(schemas(
        CreatePlanRequest,
        UpdatePlanRequest,
        PlanView,
        SubscriptionView,
        CancelSubscriptionRequest,
        ChangePlanRequest,
        UsageSummary,
        UsageCounters,
        UsageMetric,
        LimitCheck,
        CheckoutRequest,
        CheckoutResponse,
        PaymentView,
        InvoiceView,
        RevenueSummary,
    ))
)]
pub struct BillingApiDoc;

/// 套餐列表参数
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct PlanListQuery {
    /// 包含已停用套餐（仅管理员）
    #[serde(default)]
    pub include_inactive: bool,
}

/// 收入汇总参数
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct RevenueQuery {
    pub tenant_id: Option<Uuid>,
    pub since: Option<DateTime<Utc>>,
}

/// 套餐列表
#[utoipa::path(
    get,
    path = "/billing/plans",
    tag = "Billing",
    summary = "套餐列表",
    params(PlanListQuery),
    responses(
        (status = 200, description = "获取成功", body = [PlanView]),
        (status = 401, description = "未授权")
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_plans(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    query: web::Query<PlanListQuery>,
) -> ActixResult<HttpResponse> {
    let include_inactive = query.include_inactive && user.is_admin();
    let plans = state.plans.list(include_inactive).await?;
    HttpResponseBuilder::ok(plans.into_iter().map(PlanView::from).collect::<Vec<_>>())
}

/// 创建套餐
#[utoipa::path(
    post,
    path = "/billing/plans",
    tag = "Billing",
    summary = "创建套餐",
    request_body = CreatePlanRequest,
    responses(
        (status = 201, description = "创建成功", body = PlanView),
        (status = 400, description = "请求参数错误"),
        (status = 403, description = "权限不足"),
        (status = 409, description = "套餐代码已存在")
    ),
    security(("bearer_auth" = []))
)]
pub async fn create_plan(
    state: web::Data<AppState>,
    _admin: AdminUser,
    request: web::Json<CreatePlanRequest>,
) -> ActixResult<HttpResponse> {
    let plan = state.plans.create(request.into_inner()).await?;
    HttpResponseBuilder::created(PlanView::from(plan))
}

/// 套餐详情
#[utoipa::path(
    get,
    path = "/billing/plans/{plan_id}",
    tag = "Billing",
    summary = "套餐详情",
    params(("plan_id" = Uuid, Path, description = "套餐 ID")),
    responses(
        (status = 200, description = "获取成功", body = PlanView),
        (status = 404, description = "套餐不存在")
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_plan(
    state: web::Data<AppState>,
    _user: AuthenticatedUser,
    path: web::Path<Uuid>,
) -> ActixResult<HttpResponse> {
    let plan = state.plans.get(path.into_inner()).await?;
    HttpResponseBuilder::ok(PlanView::from(plan))
}

/// 更新套餐
#[utoipa::path(
    put,
    path = "/billing/plans/{plan_id}",
    tag = "Billing",
    summary = "更新套餐",
    params(("plan_id" = Uuid, Path, description = "套餐 ID")),
    request_body = UpdatePlanRequest,
    responses(
        (status = 200, description = "更新成功", body = PlanView),
        (status = 403, description = "权限不足"),
        (status = 404, description = "套餐不存在")
    ),
    security(("bearer_auth" = []))
)]
pub async fn update_plan(
    state: web::Data<AppState>,
    _admin: AdminUser,
    path: web::Path<Uuid>,
    request: web::Json<UpdatePlanRequest>,
) -> ActixResult<HttpResponse> {
    let plan = state.plans.update(path.into_inner(), request.into_inner()).await?;
    HttpResponseBuilder::ok(PlanView::from(plan))
}

/// 停用套餐
#[utoipa::path(
    delete,
    path = "/billing/plans/{plan_id}",
    tag = "Billing",
    summary = "停用套餐",
    params(("plan_id" = Uuid, Path, description = "套餐 ID")),
    responses(
        (status = 200, description = "已停用", body = PlanView),
        (status = 403, description = "权限不足"),
        (status = 404, description = "套餐不存在")
    ),
    security(("bearer_auth" = []))
)]
pub async fn deactivate_plan(
    state: web::Data<AppState>,
    _admin: AdminUser,
    path: web::Path<Uuid>,
) -> ActixResult<HttpResponse> {
    let plan = state.plans.deactivate(path.into_inner()).await?;
    HttpResponseBuilder::ok(PlanView::from(plan))
}

/// 当前订阅
#[utoipa::path(
    get,
    path = "/billing/subscription",
    tag = "Billing",
    summary = "当前订阅",
    responses(
        (status = 200, description = "获取成功", body = SubscriptionView),
        (status = 404, description = "租户没有订阅")
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_subscription(state: web::Data<AppState>, scope: TenantScope) -> ActixResult<HttpResponse> {
    let subscription = state.subscriptions.get_current(scope.tenant_id).await?;
    HttpResponseBuilder::ok(SubscriptionView::from(subscription))
}

/// 取消订阅
#[utoipa::path(
    post,
    path = "/billing/subscription/cancel",
    tag = "Billing",
    summary = "取消订阅",
    request_body = CancelSubscriptionRequest,
    responses(
        (status = 200, description = "已取消", body = SubscriptionView),
        (status = 404, description = "租户没有订阅")
    ),
    security(("bearer_auth" = []))
)]
pub async fn cancel_subscription(
    state: web::Data<AppState>,
    scope: TenantScope,
    request: web::Json<CancelSubscriptionRequest>,
) -> ActixResult<HttpResponse> {
    let subscription = state.subscriptions.cancel(scope.tenant_id, request.at_period_end).await?;
    HttpResponseBuilder::ok(SubscriptionView::from(subscription))
}

/// 更换套餐
#[utoipa::path(
    post,
    path = "/billing/subscription/change-plan",
    tag = "Billing",
    summary = "更换套餐",
    request_body = ChangePlanRequest,
    responses(
        (status = 200, description = "更换成功", body = SubscriptionView),
        (status = 404, description = "套餐或订阅不存在")
    ),
    security(("bearer_auth" = []))
)]
pub async fn change_plan(
    state: web::Data<AppState>,
    scope: TenantScope,
    request: web::Json<ChangePlanRequest>,
) -> ActixResult<HttpResponse> {
    let subscription = state.subscriptions.change_plan(scope.tenant_id, request.plan_id).await?;
    HttpResponseBuilder::ok(SubscriptionView::from(subscription))
}

/// 用量概览
#[utoipa::path(
    get,
    path = "/billing/usage",
    tag = "Billing",
    summary = "用量概览",
    responses(
        (status = 200, description = "获取成功", body = UsageSummary)
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_usage(state: web::Data<AppState>, scope: TenantScope) -> ActixResult<HttpResponse> {
    let summary = state.usage.summary(scope.tenant_id).await?;
    HttpResponseBuilder::ok(summary)
}

/// 发起结账
#[utoipa::path(
    post,
    path = "/billing/checkout",
    tag = "Billing",
    summary = "发起结账",
    description = "在 Paystack 初始化交易并返回支付链接",
    request_body = CheckoutRequest,
    responses(
        (status = 201, description = "交易已创建", body = CheckoutResponse),
        (status = 400, description = "缺少付款人邮箱"),
        (status = 502, description = "支付服务不可用")
    ),
    security(("bearer_auth" = []))
)]
pub async fn checkout(
    state: web::Data<AppState>,
    scope: TenantScope,
    request: web::Json<CheckoutRequest>,
) -> ActixResult<HttpResponse> {
    let request = request.into_inner();
    let email = request
        .email
        .or_else(|| scope.user.email.clone())
        .ok_or_else(|| PlatformError::validation("email", "缺少付款人邮箱"))?;

    let response = state.payments.initiate_checkout(scope.tenant_id, request.plan_id, &email).await?;
    HttpResponseBuilder::created(response)
}

/// 支付记录
#[utoipa::path(
    get,
    path = "/billing/payments",
    tag = "Billing",
    summary = "支付记录",
    responses(
        (status = 200, description = "获取成功", body = [PaymentView])
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_payments(state: web::Data<AppState>, scope: TenantScope) -> ActixResult<HttpResponse> {
    let payments = state.payments.list(scope.tenant_id).await?;
    HttpResponseBuilder::ok(payments.into_iter().map(PaymentView::from).collect::<Vec<_>>())
}

/// 主动核验支付
#[utoipa::path(
    post,
    path = "/billing/payments/{reference}/verify",
    tag = "Billing",
    summary = "核验支付",
    params(("reference" = String, Path, description = "支付参考号")),
    responses(
        (status = 200, description = "核验完成", body = PaymentView),
        (status = 404, description = "支付不存在")
    ),
    security(("bearer_auth" = []))
)]
pub async fn verify_payment(
    state: web::Data<AppState>,
    scope: TenantScope,
    path: web::Path<String>,
) -> ActixResult<HttpResponse> {
    let reference = path.into_inner();
    let payment = state.payments.find_by_reference(&reference).await?;
    if payment.tenant_id != scope.tenant_id {
        return Err(PlatformError::not_found("支付").into());
    }

    let payment = state.payments.verify(&reference).await?;
    HttpResponseBuilder::ok(PaymentView::from(payment))
}

/// 发票列表
#[utoipa::path(
    get,
    path = "/billing/invoices",
    tag = "Billing",
    summary = "发票列表",
    params(
        ("page" = Option<u64>, Query, description = "页码"),
        ("page_size" = Option<u64>, Query, description = "每页条数")
    ),
    responses(
        (status = 200, description = "获取成功")
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_invoices(
    state: web::Data<AppState>,
    scope: TenantScope,
    query: web::Query<PaginationParams>,
) -> ActixResult<HttpResponse> {
    let invoices = state.invoices.list(scope.tenant_id, &query).await?;
    HttpResponseBuilder::ok(invoices.map(InvoiceView::from))
}

/// 发票详情
#[utoipa::path(
    get,
    path = "/billing/invoices/{invoice_id}",
    tag = "Billing",
    summary = "发票详情",
    params(("invoice_id" = Uuid, Path, description = "发票 ID")),
    responses(
        (status = 200, description = "获取成功", body = InvoiceView),
        (status = 404, description = "发票不存在")
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_invoice(
    state: web::Data<AppState>,
    scope: TenantScope,
    path: web::Path<Uuid>,
) -> ActixResult<HttpResponse> {
    let invoice = state.invoices.get(scope.tenant_id, path.into_inner()).await?;
    HttpResponseBuilder::ok(InvoiceView::from(invoice))
}

/// 作废发票
#[utoipa::path(
    post,
    path = "/billing/invoices/{invoice_id}/void",
    tag = "Billing",
    summary = "作废发票",
    params(("invoice_id" = Uuid, Path, description = "发票 ID")),
    responses(
        (status = 200, description = "已作废", body = InvoiceView),
        (status = 403, description = "权限不足"),
        (status = 409, description = "已支付的发票不能作废")
    ),
    security(("bearer_auth" = []))
)]
pub async fn void_invoice(
    state: web::Data<AppState>,
    _admin: AdminUser,
    scope: TenantScope,
    path: web::Path<Uuid>,
) -> ActixResult<HttpResponse> {
    let invoice = state.invoices.void(scope.tenant_id, path.into_inner()).await?;
    HttpResponseBuilder::ok(InvoiceView::from(invoice))
}

/// 收入汇总
#[utoipa::path(
    get,
    path = "/billing/revenue",
    tag = "Billing",
    summary = "收入汇总",
    params(RevenueQuery),
    responses(
        (status = 200, description = "获取成功", body = RevenueSummary),
        (status = 403, description = "权限不足")
    ),
    security(("bearer_auth" = []))
)]
pub async fn revenue_summary(
    state: web::Data<AppState>,
    _admin: AdminUser,
    query: web::Query<RevenueQuery>,
) -> ActixResult<HttpResponse> {
    let summary = state.payments.revenue_summary(query.tenant_id, query.since).await?;
    HttpResponseBuilder::ok(summary)
}

/// 配置计费路由
pub fn configure_billing_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/billing")
            .route("/plans", web::get().to(list_plans))
            .route("/plans", web::post().to(create_plan))
            .route("/plans/{plan_id}", web::get().to(get_plan))
            .route("/plans/{plan_id}", web::put().to(update_plan))
            .route("/plans/{plan_id}", web::delete().to(deactivate_plan))
            .route("/subscription", web::get().to(get_subscription))
            .route("/subscription/cancel", web::post().to(cancel_subscription))
            .route("/subscription/change-plan", web::post().to(change_plan))
            .route("/usage", web::get().to(get_usage))
            .route("/checkout", web::post().to(checkout))
            .route("/payments", web::get().to(list_payments))
            .route("/payments/{reference}/verify", web::post().to(verify_payment))
            .route("/invoices", web::get().to(list_invoices))
            .route("/invoices/{invoice_id}", web::get().to(get_invoice))
            .route("/invoices/{invoice_id}/void", web::post().to(void_invoice))
            .route("/revenue", web::get().to(revenue_summary)),
    );
}
