// 支付服务
// 结账、交易核验、webhook 处理与收入统计

use crate::config::BillingConfig;
use crate::db::entities::{
    invoice::{self, InvoiceLineItem, InvoiceStatus},
    payment::{self, PaymentStatus},
    plan::{self, BillingInterval},
    prelude::*,
};
use crate::db::{PlanRepository, ProcessedEventRepository};
use crate::errors::{PlatformError, PlatformResult};
use crate::messaging::{publish_event, routing, MessageBroker};
use crate::services::billing::invoice::{InvoiceService, NewInvoice};
use crate::services::billing::paystack::{self, InitializeTransaction, PaymentGateway, TransactionDetails, WebhookEvent};
use crate::services::billing::subscription::SubscriptionService;
use crate::services::communications::is_valid_email;
use chatwise_common::EventEnvelope;
use chrono::{DateTime, Datelike, FixedOffset, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// 结账请求
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CheckoutRequest {
    pub plan_id: Uuid,
    /// 付款人邮箱；缺省使用令牌中的邮箱
    pub email: Option<String>,
}

/// 结账响应
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CheckoutResponse {
    pub payment_id: Uuid,
    pub reference: String,
    pub authorization_url: String,
    pub amount_minor: i64,
    pub currency: String,
}

/// 支付视图
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaymentView {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub plan_id: Uuid,
    pub reference: String,
    pub amount_minor: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub paid_at: Option<DateTime<FixedOffset>>,
    pub created_at: DateTime<FixedOffset>,
}

impl From<payment::Model> for PaymentView {
    fn from(model: payment::Model) -> Self {
        Self {
            id: model.id,
            tenant_id: model.tenant_id,
            plan_id: model.plan_id,
            reference: model.reference,
            amount_minor: model.amount_minor,
            currency: model.currency,
            status: model.status,
            paid_at: model.paid_at,
            created_at: model.created_at,
        }
    }
}

/// webhook 处理结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Processed,
    Duplicate,
    Ignored,
}

/// 收入汇总
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct RevenueSummary {
    /// 成功支付的总额（最小货币单位）
    pub total_collected_minor: i64,
    /// 各状态的支付笔数
    pub payments_by_status: BTreeMap<String, u64>,
    /// 按月（YYYY-MM）汇总的成功收入
    pub monthly: BTreeMap<String, i64>,
}

/// 汇总一组支付记录
pub fn summarize_revenue(payments: &[payment::Model]) -> RevenueSummary {
    let mut summary = RevenueSummary::default();
    for payment in payments {
        let status = serde_json::to_value(payment.status)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        *summary.payments_by_status.entry(status).or_default() += 1;

        if payment.status == PaymentStatus::Success {
            summary.total_collected_minor += payment.amount_minor;
            let at = payment.paid_at.unwrap_or(payment.created_at);
            let month = format!("{:04}-{:02}", at.year(), at.month());
            *summary.monthly.entry(month).or_default() += payment.amount_minor;
        }
    }
    summary
}

/// 新的支付参考号
pub fn new_reference() -> String {
    format!("cw_{}", Uuid::new_v4().simple())
}

/// 支付服务
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    broker: Arc<dyn MessageBroker>,
    invoices: Arc<InvoiceService>,
    webhook_secret: String,
    callback_url: String,
    period_days: i64,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        broker: Arc<dyn MessageBroker>,
        invoices: Arc<InvoiceService>,
        config: &BillingConfig,
    ) -> Self {
        Self {
            db,
            gateway,
            broker,
            invoices,
            webhook_secret: config.paystack_secret_key.clone(),
            callback_url: config.callback_url.clone(),
            period_days: config.period_days,
        }
    }

    fn period_days_for(&self, plan: &plan::Model) -> i64 {
        match plan.billing_interval {
            BillingInterval::Monthly => self.period_days,
            BillingInterval::Annually => BillingInterval::Annually.days(),
        }
    }

    /// 创建待付款记录并返回支付页面地址
    #[instrument(skip(self, email))]
    pub async fn initiate_checkout(&self, tenant_id: Uuid, plan_id: Uuid, email: &str) -> PlatformResult<CheckoutResponse> {
        if !is_valid_email(email) {
            return Err(PlatformError::validation("email", "付款邮箱格式无效"));
        }
        let plan = PlanRepository::get(self.db.as_ref(), plan_id).await?;
        if !plan.is_active {
            return Err(PlatformError::validation("plan_id", format!("套餐 {} 已停用", plan.code)));
        }
        if plan.price_minor <= 0 {
            return Err(PlatformError::validation("plan_id", "免费套餐无需付款"));
        }

        let reference = new_reference();
        let initialized = self
            .gateway
            .initialize(&InitializeTransaction {
                email: email.to_string(),
                amount: plan.price_minor,
                currency: plan.currency.clone(),
                reference: reference.clone(),
                callback_url: (!self.callback_url.is_empty()).then(|| self.callback_url.clone()),
                metadata: json!({ "tenant_id": tenant_id, "plan_id": plan.id }),
            })
            .await?;

        let now = Utc::now();
        let model = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(tenant_id),
            plan_id: Set(plan.id),
            reference: Set(reference.clone()),
            amount_minor: Set(plan.price_minor),
            currency: Set(plan.currency.clone()),
            status: Set(PaymentStatus::Pending),
            provider: Set("paystack".to_string()),
            email: Set(email.to_string()),
            authorization_url: Set(Some(initialized.authorization_url.clone())),
            paid_at: Set(None),
            metadata: Set(json!({ "access_code": initialized.access_code })),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(self.db.as_ref())
        .await?;

        info!(tenant_id = %tenant_id, reference = %reference, amount_minor = plan.price_minor, "结账已创建");
        Ok(CheckoutResponse {
            payment_id: model.id,
            reference,
            authorization_url: initialized.authorization_url,
            amount_minor: model.amount_minor,
            currency: model.currency,
        })
    }

    pub async fn find_by_reference(&self, reference: &str) -> PlatformResult<payment::Model> {
        Payment::find()
            .filter(payment::Column::Reference.eq(reference))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| PlatformError::not_found(format!("支付 {}", reference)))
    }

    /// 向网关核验交易并更新本地状态
    #[instrument(skip(self))]
    pub async fn verify(&self, reference: &str) -> PlatformResult<payment::Model> {
        let payment = self.find_by_reference(reference).await?;
        if payment.status.is_final() {
            return Ok(payment);
        }
        let details = self.gateway.verify(reference).await?;
        self.apply_transaction(payment, &details).await
    }

    /// 处理 Paystack webhook；同一事件和参考号最多处理一次
    #[instrument(skip(self, body, signature))]
    pub async fn handle_webhook(&self, body: &[u8], signature: Option<&str>) -> PlatformResult<WebhookOutcome> {
        let signature = signature.ok_or_else(|| PlatformError::authentication("缺少 webhook 签名"))?;
        if !paystack::verify_signature(&self.webhook_secret, body, signature) {
            warn!("webhook 签名校验失败");
            return Err(PlatformError::authentication("webhook 签名无效"));
        }

        let event: WebhookEvent = serde_json::from_slice(body)
            .map_err(|e| PlatformError::validation("body", format!("无法解析 webhook: {}", e)))?;
        if !matches!(event.event.as_str(), "charge.success" | "charge.failed") {
            info!(event = %event.event, "忽略 webhook 事件");
            return Ok(WebhookOutcome::Ignored);
        }

        let key = format!("paystack:{}:{}", event.event, event.data.reference);
        if !ProcessedEventRepository::try_insert(self.db.as_ref(), &key, "paystack_webhook").await? {
            info!(reference = %event.data.reference, "重复的 webhook，跳过");
            return Ok(WebhookOutcome::Duplicate);
        }

        let result = async {
            let payment = self.find_by_reference(&event.data.reference).await?;
            self.apply_transaction(payment, &event.data).await
        }
        .await;

        match result {
            Ok(_) => Ok(WebhookOutcome::Processed),
            Err(e) => {
                ProcessedEventRepository::delete(self.db.as_ref(), &key).await?;
                Err(e)
            }
        }
    }

    async fn apply_transaction(&self, payment: payment::Model, details: &TransactionDetails) -> PlatformResult<payment::Model> {
        match details.status.as_str() {
            "success" => {
                if details.amount != payment.amount_minor {
                    warn!(reference = %payment.reference, expected = payment.amount_minor, received = details.amount, "支付金额不一致");
                    return self.mark(payment, PaymentStatus::Failed).await;
                }
                self.complete(payment, details.paid_at.unwrap_or_else(Utc::now)).await
            }
            "failed" => self.mark(payment, PaymentStatus::Failed).await,
            "abandoned" => self.mark(payment, PaymentStatus::Abandoned).await,
            _ => Ok(payment),
        }
    }

    async fn mark(&self, payment: payment::Model, status: PaymentStatus) -> PlatformResult<payment::Model> {
        if payment.status.is_final() {
            return Ok(payment);
        }
        let reference = payment.reference.clone();
        let mut active: payment::ActiveModel = payment.into();
        active.status = Set(status);
        active.updated_at = Set(Utc::now().into());
        let model = active.update(self.db.as_ref()).await?;
        warn!(reference = %reference, status = ?status, "支付未成功");
        Ok(model)
    }

    /// 标记成功、激活订阅、生成发票并发布事件
    ///
    /// 三项写入在同一事务内完成，事件在提交后发布。支付已成功时只补发事件，
    /// 消费方按幂等键去重。
    async fn complete(&self, payment: payment::Model, paid_at: DateTime<Utc>) -> PlatformResult<payment::Model> {
        if payment.status == PaymentStatus::Success {
            return self.republish(payment).await;
        }

        let plan = PlanRepository::get(self.db.as_ref(), payment.plan_id).await?;
        let paid_at: DateTime<FixedOffset> = paid_at.into();
        let now: DateTime<FixedOffset> = Utc::now().into();

        let txn = self.db.begin().await?;
        let claimed = Payment::update_many()
            .col_expr(payment::Column::Status, Expr::value(PaymentStatus::Success))
            .col_expr(payment::Column::PaidAt, Expr::value(Some(paid_at)))
            .col_expr(payment::Column::UpdatedAt, Expr::value(now))
            .filter(payment::Column::Id.eq(payment.id))
            .filter(payment::Column::Status.eq(PaymentStatus::Pending))
            .exec(&txn)
            .await?;
        if claimed.rows_affected == 0 {
            txn.rollback().await?;
            info!(reference = %payment.reference, "支付已由其他请求处理");
            let current = self.find_by_reference(&payment.reference).await?;
            return match current.status {
                PaymentStatus::Success => self.republish(current).await,
                _ => Ok(current),
            };
        }

        let subscription = SubscriptionService::activate_in(&txn, payment.tenant_id, plan.id, self.period_days_for(&plan)).await?;
        let invoice = InvoiceService::generate_in(
            &txn,
            NewInvoice {
                tenant_id: payment.tenant_id,
                subscription_id: Some(subscription.id),
                payment_id: Some(payment.id),
                currency: payment.currency.clone(),
                status: InvoiceStatus::Paid,
                period_start: subscription.current_period_start,
                period_end: subscription.current_period_end,
                line_items: vec![InvoiceLineItem {
                    description: format!("{} 套餐", plan.name),
                    quantity: 1,
                    unit_amount_minor: payment.amount_minor,
                    amount_minor: payment.amount_minor,
                }],
            },
        )
        .await?;
        txn.commit().await?;

        let payment = payment::Model {
            status: PaymentStatus::Success,
            paid_at: Some(paid_at),
            updated_at: now,
            ..payment
        };
        self.publish_completion(&payment, &invoice).await?;

        info!(tenant_id = %payment.tenant_id, reference = %payment.reference, invoice = %invoice.number, "支付已完成");
        Ok(payment)
    }

    /// 重新发布已完成支付的事件
    async fn republish(&self, payment: payment::Model) -> PlatformResult<payment::Model> {
        match self.invoices.find_by_payment(payment.id).await? {
            Some(invoice) => {
                info!(reference = %payment.reference, "补发支付完成事件");
                self.publish_completion(&payment, &invoice).await?;
            }
            None => warn!(reference = %payment.reference, "已成功的支付缺少发票"),
        }
        Ok(payment)
    }

    async fn publish_completion(&self, payment: &payment::Model, invoice: &invoice::Model) -> PlatformResult<()> {
        let succeeded = EventEnvelope::new(
            routing::PAYMENT_SUCCEEDED,
            Some(payment.tenant_id),
            json!({
                "payment_id": payment.id,
                "reference": payment.reference,
                "plan_id": payment.plan_id,
                "amount_minor": payment.amount_minor,
                "currency": payment.currency,
                "subscription_id": invoice.subscription_id,
            }),
        )
        .with_idempotency_key(format!("payment:{}", payment.reference));
        publish_event(self.broker.as_ref(), routing::PAYMENT_SUCCEEDED, &succeeded).await?;

        let generated = EventEnvelope::new(
            routing::INVOICE_GENERATED,
            Some(payment.tenant_id),
            json!({
                "invoice_id": invoice.id,
                "number": invoice.number,
                "amount_minor": invoice.amount_minor,
                "currency": invoice.currency,
            }),
        )
        .with_idempotency_key(format!("invoice:{}", invoice.id));
        publish_event(self.broker.as_ref(), routing::INVOICE_GENERATED, &generated).await
    }

    pub async fn list(&self, tenant_id: Uuid) -> PlatformResult<Vec<payment::Model>> {
        Ok(Payment::find()
            .filter(payment::Column::TenantId.eq(tenant_id))
            .order_by_desc(payment::Column::CreatedAt)
            .all(self.db.as_ref())
            .await?)
    }

    /// 收入汇总；指定租户时只统计该租户
    pub async fn revenue_summary(&self, tenant_id: Option<Uuid>, since: Option<DateTime<Utc>>) -> PlatformResult<RevenueSummary> {
        let mut query = Payment::find();
        if let Some(tenant_id) = tenant_id {
            query = query.filter(payment::Column::TenantId.eq(tenant_id));
        }
        if let Some(since) = since {
            query = query.filter(payment::Column::CreatedAt.gte(since));
        }
        let payments = query.all(self.db.as_ref()).await?;
        Ok(summarize_revenue(&payments))
    }
}
