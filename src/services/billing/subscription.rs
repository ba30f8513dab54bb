// 订阅服务
// 试用、激活、取消、换套餐与读取时的惰性过期

use crate::config::BillingConfig;
use crate::db::entities::{plan, prelude::*, subscription};
use crate::db::{PlanRepository, SubscriptionRepository};
use crate::errors::{PlatformError, PlatformResult};
use crate::messaging::{publish_event, routing, MessageBroker};
use crate::services::billing::usage::UsageCounters;
use chatwise_common::EventEnvelope;
use chrono::{DateTime, Duration, FixedOffset, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use subscription::SubscriptionStatus;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// 按当前时间计算订阅的实际状态
///
/// 试用或有效的订阅在周期结束后视为已过期。
pub fn effective_status(
    status: SubscriptionStatus,
    period_end: DateTime<FixedOffset>,
    now: DateTime<Utc>,
) -> SubscriptionStatus {
    if status.is_live() && period_end <= now {
        SubscriptionStatus::Expired
    } else {
        status
    }
}

/// 订阅视图
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SubscriptionView {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub plan_id: Uuid,
    pub status: SubscriptionStatus,
    pub current_period_start: DateTime<FixedOffset>,
    pub current_period_end: DateTime<FixedOffset>,
    pub cancel_at_period_end: bool,
    pub usage: UsageCounters,
}

impl From<subscription::Model> for SubscriptionView {
    fn from(model: subscription::Model) -> Self {
        Self {
            usage: UsageCounters::from_json(&model.usage),
            id: model.id,
            tenant_id: model.tenant_id,
            plan_id: model.plan_id,
            status: model.status,
            current_period_start: model.current_period_start,
            current_period_end: model.current_period_end,
            cancel_at_period_end: model.cancel_at_period_end,
        }
    }
}

/// 取消请求
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CancelSubscriptionRequest {
    /// 为 true 时在当期结束后取消
    #[serde(default = "default_true")]
    pub at_period_end: bool,
}

fn default_true() -> bool {
    true
}

/// 换套餐请求
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ChangePlanRequest {
    pub plan_id: Uuid,
}

/// 订阅服务
#[derive(Clone)]
pub struct SubscriptionService {
    db: Arc<DatabaseConnection>,
    broker: Arc<dyn MessageBroker>,
    trial_days: i64,
    trial_plan_code: String,
}

impl SubscriptionService {
    pub fn new(db: Arc<DatabaseConnection>, broker: Arc<dyn MessageBroker>, config: &BillingConfig) -> Self {
        Self {
            db,
            broker,
            trial_days: config.trial_days,
            trial_plan_code: config.trial_plan_code.clone(),
        }
    }

    /// 为新租户创建试用订阅；租户已有订阅时返回已有的
    #[instrument(skip(self))]
    pub async fn create_trial(&self, tenant_id: Uuid) -> PlatformResult<subscription::Model> {
        if let Some(existing) = SubscriptionRepository::latest_for_tenant(self.db.as_ref(), tenant_id).await? {
            info!(tenant_id = %tenant_id, subscription_id = %existing.id, "租户已有订阅，跳过试用创建");
            return Ok(existing);
        }

        let plan = PlanRepository::find_by_code(self.db.as_ref(), &self.trial_plan_code)
            .await?
            .ok_or_else(|| PlatformError::configuration(format!("试用套餐 {} 不存在", self.trial_plan_code)))?;

        let now = Utc::now();
        let model = subscription::ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(tenant_id),
            plan_id: Set(plan.id),
            status: Set(SubscriptionStatus::Trialing),
            current_period_start: Set(now.into()),
            current_period_end: Set((now + Duration::days(self.trial_days)).into()),
            cancel_at_period_end: Set(false),
            usage: Set(UsageCounters::default().to_json()),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(self.db.as_ref())
        .await?;

        info!(tenant_id = %tenant_id, subscription_id = %model.id, plan = %plan.code, "试用订阅已创建");
        Ok(model)
    }

    /// 租户当前订阅，过期的会在读取时标记、保存并发布过期事件
    #[instrument(skip(self))]
    pub async fn current(&self, tenant_id: Uuid) -> PlatformResult<Option<subscription::Model>> {
        let Some(model) = SubscriptionRepository::latest_for_tenant(self.db.as_ref(), tenant_id).await? else {
            return Ok(None);
        };
        self.apply_expiry(model, Utc::now()).await.map(Some)
    }

    pub async fn get_current(&self, tenant_id: Uuid) -> PlatformResult<subscription::Model> {
        self.current(tenant_id)
            .await?
            .ok_or_else(|| PlatformError::not_found(format!("租户 {} 的订阅", tenant_id)))
    }

    /// 将到期订阅转为过期；只有完成状态转换的一方发布 `subscription.expired`
    async fn apply_expiry(&self, mut model: subscription::Model, now: DateTime<Utc>) -> PlatformResult<subscription::Model> {
        let status = effective_status(model.status, model.current_period_end, now);
        if status == model.status {
            return Ok(model);
        }

        let result = Subscription::update_many()
            .col_expr(subscription::Column::Status, Expr::value(status))
            .col_expr(subscription::Column::UpdatedAt, Expr::value(DateTime::<FixedOffset>::from(now)))
            .filter(subscription::Column::Id.eq(model.id))
            .filter(subscription::Column::Status.is_in([SubscriptionStatus::Trialing, SubscriptionStatus::Active]))
            .exec(self.db.as_ref())
            .await?;

        model.status = status;
        model.updated_at = now.into();
        if result.rows_affected == 0 {
            return Ok(model);
        }

        warn!(tenant_id = %model.tenant_id, subscription_id = %model.id, "订阅已过期");
        let event = EventEnvelope::new(
            routing::SUBSCRIPTION_EXPIRED,
            Some(model.tenant_id),
            json!({
                "subscription_id": model.id,
                "plan_id": model.plan_id,
                "expired_at": model.current_period_end,
            }),
        )
        .with_idempotency_key(format!("subscription-expired:{}", model.id));
        if let Err(e) = publish_event(self.broker.as_ref(), routing::SUBSCRIPTION_EXPIRED, &event).await {
            warn!(subscription_id = %model.id, error = %e, "发布订阅过期事件失败");
        }
        Ok(model)
    }

    /// 付款成功后激活订阅，开始新周期并清零用量
    /// 在给定连接或事务内执行
    #[instrument(skip(db))]
    pub async fn activate_in<C: ConnectionTrait>(
        db: &C,
        tenant_id: Uuid,
        plan_id: Uuid,
        period_days: i64,
    ) -> PlatformResult<subscription::Model> {
        let now = Utc::now();
        let period_end: DateTime<FixedOffset> = (now + Duration::days(period_days)).into();

        let model = match SubscriptionRepository::latest_for_tenant(db, tenant_id).await? {
            Some(existing) => {
                let mut active: subscription::ActiveModel = existing.into();
                active.plan_id = Set(plan_id);
                active.status = Set(SubscriptionStatus::Active);
                active.current_period_start = Set(now.into());
                active.current_period_end = Set(period_end);
                active.cancel_at_period_end = Set(false);
                active.usage = Set(UsageCounters::default().to_json());
                active.updated_at = Set(now.into());
                active.update(db).await?
            }
            None => {
                subscription::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    tenant_id: Set(tenant_id),
                    plan_id: Set(plan_id),
                    status: Set(SubscriptionStatus::Active),
                    current_period_start: Set(now.into()),
                    current_period_end: Set(period_end),
                    cancel_at_period_end: Set(false),
                    usage: Set(UsageCounters::default().to_json()),
                    created_at: Set(now.into()),
                    updated_at: Set(now.into()),
                }
                .insert(db)
                .await?
            }
        };

        info!(tenant_id = %tenant_id, subscription_id = %model.id, plan_id = %plan_id, "订阅已激活");
        Ok(model)
    }

    /// 取消订阅；`at_period_end` 为 false 时立即结束
    #[instrument(skip(self))]
    pub async fn cancel(&self, tenant_id: Uuid, at_period_end: bool) -> PlatformResult<subscription::Model> {
        let current = self.get_current(tenant_id).await?;
        if !current.status.is_live() {
            return Err(PlatformError::conflict(format!("订阅状态为 {:?}，无法取消", current.status)));
        }

        let now = Utc::now();
        let mut active: subscription::ActiveModel = current.into();
        if at_period_end {
            active.cancel_at_period_end = Set(true);
        } else {
            active.status = Set(SubscriptionStatus::Cancelled);
            active.current_period_end = Set(now.into());
        }
        active.updated_at = Set(now.into());

        let model = active.update(self.db.as_ref()).await?;
        info!(tenant_id = %tenant_id, at_period_end, "订阅已取消");
        Ok(model)
    }

    /// 在当期内更换套餐
    #[instrument(skip(self))]
    pub async fn change_plan(&self, tenant_id: Uuid, plan_id: Uuid) -> PlatformResult<subscription::Model> {
        let plan = PlanRepository::get(self.db.as_ref(), plan_id).await?;
        if !plan.is_active {
            return Err(PlatformError::validation("plan_id", format!("套餐 {} 已停用", plan.code)));
        }

        let current = self.get_current(tenant_id).await?;
        if !current.status.is_live() {
            return Err(PlatformError::payment_required("订阅不可用，请先付款"));
        }

        let mut active: subscription::ActiveModel = current.into();
        active.plan_id = Set(plan.id);
        active.updated_at = Set(Utc::now().into());
        let model = active.update(self.db.as_ref()).await?;

        info!(tenant_id = %tenant_id, plan = %plan.code, "套餐已更换");
        Ok(model)
    }

    /// 批量标记已到期的订阅并发布过期事件，返回被标记的订阅
    #[instrument(skip(self))]
    pub async fn expire_overdue(&self) -> PlatformResult<Vec<subscription::Model>> {
        let now = Utc::now();
        let overdue = Subscription::find()
            .filter(subscription::Column::Status.is_in([SubscriptionStatus::Trialing, SubscriptionStatus::Active]))
            .filter(subscription::Column::CurrentPeriodEnd.lte(now))
            .all(self.db.as_ref())
            .await?;

        let mut expired = Vec::with_capacity(overdue.len());
        for model in overdue {
            let model = self.apply_expiry(model, now).await?;
            if model.status == SubscriptionStatus::Expired {
                expired.push(model);
            }
        }

        if !expired.is_empty() {
            info!(count = expired.len(), "已标记过期订阅");
        }
        Ok(expired)
    }

    /// 订阅及其套餐
    pub async fn with_plan(&self, tenant_id: Uuid) -> PlatformResult<(subscription::Model, plan::Model)> {
        let current = self.get_current(tenant_id).await?;
        let plan = PlanRepository::get(self.db.as_ref(), current.plan_id).await?;
        Ok((current, plan))
    }
}
