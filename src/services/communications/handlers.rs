// 通知事件消费者

use super::notification::{NotificationService, SendEmailRequest};
use super::templates::{format_amount, EmailTemplate};
use crate::db::repositories::TenantRepository;
use crate::errors::{PlatformError, PlatformResult};
use crate::messaging::topics::{routing, BILLING_EXCHANGE, EMAIL_SEND_QUEUE, TENANT_EXCHANGE};
use crate::messaging::{Binding, EventHandler};
use async_trait::async_trait;
use chatwise_common::EventEnvelope;
use sea_orm::DatabaseConnection;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

fn require_tenant(event: &EventEnvelope) -> PlatformResult<Uuid> {
    event
        .tenant_id
        .ok_or_else(|| PlatformError::validation("tenant_id", format!("{} 缺少租户", event.event_type)))
}

/// `email.send` 工作队列
pub struct EmailSendHandler {
    notifications: Arc<NotificationService>,
}

impl EmailSendHandler {
    pub fn new(notifications: Arc<NotificationService>) -> Self {
        Self { notifications }
    }
}

#[async_trait]
impl EventHandler for EmailSendHandler {
    fn name(&self) -> &'static str {
        "communications.email_send"
    }

    fn queue(&self) -> String {
        EMAIL_SEND_QUEUE.to_string()
    }

    fn bindings(&self) -> Vec<Binding> {
        Vec::new()
    }

    async fn handle(&self, event: &EventEnvelope) -> PlatformResult<()> {
        let mut request: SendEmailRequest = event.payload_as()?;
        request.tenant_id = request.tenant_id.or(event.tenant_id);
        if request.idempotency_key.is_none() {
            request.idempotency_key = Some(format!("email:{}", event.dedup_key()));
        }
        self.notifications.send(request).await?;
        Ok(())
    }
}

/// `tenant.created` 负载
#[derive(Debug, Clone, Deserialize)]
pub struct TenantCreatedPayload {
    pub tenant_id: Uuid,
    pub name: String,
    pub slug: String,
    pub contact_email: String,
}

/// 新租户欢迎邮件
pub struct WelcomeEmailHandler {
    notifications: Arc<NotificationService>,
}

impl WelcomeEmailHandler {
    pub fn new(notifications: Arc<NotificationService>) -> Self {
        Self { notifications }
    }
}

#[async_trait]
impl EventHandler for WelcomeEmailHandler {
    fn name(&self) -> &'static str {
        "communications.welcome"
    }

    fn bindings(&self) -> Vec<Binding> {
        vec![Binding::new(TENANT_EXCHANGE, routing::TENANT_CREATED)]
    }

    async fn handle(&self, event: &EventEnvelope) -> PlatformResult<()> {
        let payload: TenantCreatedPayload = event.payload_as()?;
        let request = SendEmailRequest::new(
            Some(payload.tenant_id),
            EmailTemplate::Welcome,
            payload.contact_email,
            json!({ "tenant_name": payload.name, "slug": payload.slug }),
        )
        .with_idempotency_key(format!("welcome:{}", payload.tenant_id));
        self.notifications.send(request).await?;
        Ok(())
    }
}

/// `user.created` 负载中与邮件相关的部分
#[derive(Debug, Clone, Deserialize)]
struct UserCreatedPayload {
    user_id: String,
    #[serde(default)]
    email: Option<String>,
}

/// 试用开通邮件
pub struct TrialStartedEmailHandler {
    notifications: Arc<NotificationService>,
}

impl TrialStartedEmailHandler {
    pub fn new(notifications: Arc<NotificationService>) -> Self {
        Self { notifications }
    }
}

#[async_trait]
impl EventHandler for TrialStartedEmailHandler {
    fn name(&self) -> &'static str {
        "communications.trial_started"
    }

    fn bindings(&self) -> Vec<Binding> {
        vec![Binding::new(TENANT_EXCHANGE, routing::USER_CREATED)]
    }

    async fn handle(&self, event: &EventEnvelope) -> PlatformResult<()> {
        let payload: UserCreatedPayload = event.payload_as()?;
        let Some(email) = payload.email else {
            return Ok(());
        };
        let request = SendEmailRequest::new(event.tenant_id, EmailTemplate::TrialStarted, email.clone(), json!({ "email": email }))
            .with_idempotency_key(format!("trial-started:{}", payload.user_id));
        self.notifications.send(request).await?;
        Ok(())
    }
}

/// `invoice.generated` 负载
#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceGeneratedPayload {
    pub invoice_id: Uuid,
    pub number: String,
    pub amount_minor: i64,
    pub currency: String,
}

/// 发票邮件，发给租户联系邮箱
pub struct InvoiceEmailHandler {
    db: Arc<DatabaseConnection>,
    notifications: Arc<NotificationService>,
}

impl InvoiceEmailHandler {
    pub fn new(db: Arc<DatabaseConnection>, notifications: Arc<NotificationService>) -> Self {
        Self { db, notifications }
    }
}

#[async_trait]
impl EventHandler for InvoiceEmailHandler {
    fn name(&self) -> &'static str {
        "communications.invoice"
    }

    fn bindings(&self) -> Vec<Binding> {
        vec![Binding::new(BILLING_EXCHANGE, routing::INVOICE_GENERATED)]
    }

    async fn handle(&self, event: &EventEnvelope) -> PlatformResult<()> {
        let tenant_id = require_tenant(event)?;
        let payload: InvoiceGeneratedPayload = event.payload_as()?;
        let tenant = TenantRepository::get(self.db.as_ref(), tenant_id).await?;

        let request = SendEmailRequest::new(
            Some(tenant_id),
            EmailTemplate::InvoiceGenerated,
            tenant.contact_email,
            json!({
                "invoice_number": payload.number,
                "amount": format_amount(payload.amount_minor),
                "currency": payload.currency,
            }),
        )
        .with_idempotency_key(format!("invoice-email:{}", payload.invoice_id));
        self.notifications.send(request).await?;
        Ok(())
    }
}

/// `payment.succeeded` 负载
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentSucceededPayload {
    pub reference: String,
    pub amount_minor: i64,
    pub currency: String,
}

/// 付款回执
pub struct PaymentReceivedHandler {
    db: Arc<DatabaseConnection>,
    notifications: Arc<NotificationService>,
}

impl PaymentReceivedHandler {
    pub fn new(db: Arc<DatabaseConnection>, notifications: Arc<NotificationService>) -> Self {
        Self { db, notifications }
    }
}

#[async_trait]
impl EventHandler for PaymentReceivedHandler {
    fn name(&self) -> &'static str {
        "communications.payment_received"
    }

    fn bindings(&self) -> Vec<Binding> {
        vec![Binding::new(BILLING_EXCHANGE, routing::PAYMENT_SUCCEEDED)]
    }

    async fn handle(&self, event: &EventEnvelope) -> PlatformResult<()> {
        let tenant_id = require_tenant(event)?;
        let payload: PaymentSucceededPayload = event.payload_as()?;
        let tenant = TenantRepository::get(self.db.as_ref(), tenant_id).await?;

        let request = SendEmailRequest::new(
            Some(tenant_id),
            EmailTemplate::PaymentReceived,
            tenant.contact_email,
            json!({
                "reference": payload.reference,
                "amount": format_amount(payload.amount_minor),
                "currency": payload.currency,
            }),
        )
        .with_idempotency_key(format!("payment-email:{}", payload.reference));
        self.notifications.send(request).await?;
        Ok(())
    }
}

/// `subscription.expired` 负载
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionExpiredPayload {
    pub subscription_id: Uuid,
    pub expired_at: chrono::DateTime<chrono::Utc>,
}

/// 订阅到期提醒
pub struct SubscriptionExpiredHandler {
    db: Arc<DatabaseConnection>,
    notifications: Arc<NotificationService>,
}

impl SubscriptionExpiredHandler {
    pub fn new(db: Arc<DatabaseConnection>, notifications: Arc<NotificationService>) -> Self {
        Self { db, notifications }
    }
}

#[async_trait]
impl EventHandler for SubscriptionExpiredHandler {
    fn name(&self) -> &'static str {
        "communications.subscription_expired"
    }

    fn bindings(&self) -> Vec<Binding> {
        vec![Binding::new(BILLING_EXCHANGE, routing::SUBSCRIPTION_EXPIRED)]
    }

    async fn handle(&self, event: &EventEnvelope) -> PlatformResult<()> {
        let tenant_id = require_tenant(event)?;
        let payload: SubscriptionExpiredPayload = event.payload_as()?;
        let tenant = TenantRepository::get(self.db.as_ref(), tenant_id).await?;

        let request = SendEmailRequest::new(
            Some(tenant_id),
            EmailTemplate::SubscriptionExpired,
            tenant.contact_email,
            json!({
                "tenant_name": tenant.name,
                "expired_at": payload.expired_at.format("%Y-%m-%d").to_string(),
            }),
        )
        .with_idempotency_key(format!("subscription-expired:{}", payload.subscription_id));
        self.notifications.send(request).await?;
        Ok(())
    }
}
