// API 路由定义
// 健康检查与支付回调公开，其余接口需要 Bearer 令牌

use std::sync::Arc;

use actix_web::{web, HttpResponse, Result as ActixResult};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::openapi::ComponentsBuilder;
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::api::handlers::{billing, chat, communications, health, onboarding, quality, webhooks, workflow};
use crate::api::middleware::JwtAuthMiddleware;
use crate::api::responses::HttpResponseBuilder;
use crate::config::ServiceKind;
use crate::services::auth::TokenValidator;

/// API 文档聚合
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Chatwise API",
        description = "多租户聊天机器人平台接口文档",
        version = "1.0.0",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers((url = "/api/v1", description = "API v1")),
    tags(
        (name = "Health", description = "健康检查相关接口"),
        (name = "Billing", description = "套餐、订阅、支付与发票"),
        (name = "Chat", description = "聊天会话与消息"),
        (name = "Quality", description = "回答质量与知识缺口"),
        (name = "Communications", description = "事务邮件与通知日志"),
        (name = "Onboarding", description = "租户注册与文档摄取"),
        (name = "Workflow", description = "工作流执行"),
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(|| ComponentsBuilder::new().build());
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).bearer_format("JWT").build()),
        );
    }
}

/// 合并各模块的 OpenAPI 文档
pub fn openapi_spec() -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();
    doc.merge(health::HealthApiDoc::openapi());
    doc.merge(webhooks::WebhookApiDoc::openapi());
    doc.merge(billing::BillingApiDoc::openapi());
    doc.merge(chat::ChatApiDoc::openapi());
    doc.merge(quality::QualityApiDoc::openapi());
    doc.merge(communications::CommunicationsApiDoc::openapi());
    doc.merge(onboarding::OnboardingApiDoc::openapi());
    doc.merge(workflow::WorkflowApiDoc::openapi());
    BearerAuth.modify(&mut doc);
    doc
}

/// 根路径处理器
async fn api_root() -> ActixResult<HttpResponse> {
    HttpResponseBuilder::ok(serde_json::json!({
        "name": "Chatwise API",
        "version": env!("CARGO_PKG_VERSION"),
        "documentation": "/api/v1/docs/",
        "openapi": "/api/v1/openapi.json",
        "health": "/api/v1/health",
        "ready": "/api/v1/ready",
    }))
}

/// 配置 Swagger UI 与 OpenAPI JSON
pub fn configure_swagger_ui(cfg: &mut web::ServiceConfig) {
    cfg.service(SwaggerUi::new("/api/v1/docs/{_:.*}").url("/api/v1/openapi.json", openapi_spec()));
}

/// 配置 API 路由，只挂载已启用服务的路由组
pub fn configure_routes(
    validator: Arc<TokenValidator>,
    services: Vec<ServiceKind>,
) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg| {
        let billing_enabled = services.contains(&ServiceKind::Billing);

        let protected = move |cfg: &mut web::ServiceConfig| {
            let enabled = |kind: ServiceKind| services.contains(&kind);
            if enabled(ServiceKind::Billing) {
                billing::configure_billing_routes(cfg);
            }
            if enabled(ServiceKind::Chat) {
                chat::configure_chat_routes(cfg);
            }
            if enabled(ServiceKind::Quality) {
                quality::configure_quality_routes(cfg);
            }
            if enabled(ServiceKind::Communications) {
                communications::configure_communications_routes(cfg);
            }
            if enabled(ServiceKind::Onboarding) {
                onboarding::configure_onboarding_routes(cfg);
            }
            if enabled(ServiceKind::Workflow) {
                workflow::configure_workflow_routes(cfg);
            }
        };

        configure_swagger_ui(cfg);
        cfg.route("/health", web::get().to(health::health_check)).service(
            web::scope("/api/v1")
                .route("", web::get().to(api_root))
                .configure(health::configure_health_routes)
                .configure(move |cfg| {
                    if billing_enabled {
                        webhooks::configure_webhook_routes(cfg);
                    }
                })
                .service(web::scope("").wrap(JwtAuthMiddleware::new(validator)).configure(protected)),
        );
    }
}
