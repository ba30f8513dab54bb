// 支付回调处理器
// Paystack webhook 不经过令牌认证，由签名校验保护

use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use utoipa::OpenApi;

use crate::services::billing::paystack::SIGNATURE_HEADER;
use crate::services::billing::WebhookOutcome;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(paystack_webhook), components(schemas(WebhookOutcome)))]
pub struct WebhookApiDoc;

/// Paystack 事件回调
#[utoipa::path(
    post,
    path = "/billing/webhooks/paystack",
    tag = "Billing",
    summary = "Paystack webhook",
    description = "使用 HMAC-SHA512 签名校验原始请求体",
    request_body(content = String, content_type = "application/json"),
    params(("x-paystack-signature" = String, Header, description = "请求体签名")),
    responses(
        (status = 200, description = "已处理、重复或忽略", body = WebhookOutcome),
        (status = 401, description = "签名缺失或无效"),
        (status = 400, description = "请求体无法解析")
    )
)]
pub async fn paystack_webhook(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Bytes,
) -> ActixResult<HttpResponse> {
    let signature = req.headers().get(SIGNATURE_HEADER).and_then(|h| h.to_str().ok());
    let outcome = state.payments.handle_webhook(&body, signature).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "status": outcome })))
}

/// 配置 webhook 路由
pub fn configure_webhook_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/billing/webhooks/paystack", web::post().to(paystack_webhook));
}
