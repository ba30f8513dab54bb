// 用量计量
// 当期用量计数、限额检查与用量事件消费

use crate::db::entities::{plan::PlanLimits, prelude::*, subscription};
use crate::errors::{PlatformError, PlatformResult};
use crate::messaging::topics::{routing, USAGE_EXCHANGE};
use crate::messaging::{Binding, EventHandler};
use crate::services::billing::subscription::SubscriptionService;
use async_trait::async_trait;
use chatwise_common::EventEnvelope;
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::*;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use std::sync::Arc;

/// 计量指标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UsageMetric {
    Messages,
    Documents,
    StorageBytes,
}

impl UsageMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Messages => "messages",
            Self::Documents => "documents",
            Self::StorageBytes => "storage_bytes",
        }
    }
}

/// 当期用量计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct UsageCounters {
    #[serde(default)]
    pub messages: i64,
    #[serde(default)]
    pub documents: i64,
    #[serde(default)]
    pub storage_bytes: i64,
}

impl UsageCounters {
    /// 从订阅的 JSON 列解析；无法解析时视为零
    pub fn from_json(value: &serde_json::Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "messages": self.messages,
            "documents": self.documents,
            "storage_bytes": self.storage_bytes,
        })
    }

    pub fn get(&self, metric: UsageMetric) -> i64 {
        match metric {
            UsageMetric::Messages => self.messages,
            UsageMetric::Documents => self.documents,
            UsageMetric::StorageBytes => self.storage_bytes,
        }
    }

    /// 累加增量，结果不会小于零
    pub fn apply(&mut self, metric: UsageMetric, delta: i64) {
        let counter = match metric {
            UsageMetric::Messages => &mut self.messages,
            UsageMetric::Documents => &mut self.documents,
            UsageMetric::StorageBytes => &mut self.storage_bytes,
        };
        *counter = counter.saturating_add(delta).max(0);
    }
}

/// 限额检查结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct LimitCheck {
    pub metric: UsageMetric,
    pub current: i64,
    /// 0 表示不限
    pub limit: i64,
    pub requested: i64,
    pub allowed: bool,
}

impl LimitCheck {
    pub fn remaining(&self) -> Option<i64> {
        (self.limit > 0).then(|| (self.limit - self.current).max(0))
    }
}

pub fn limit_for(limits: &PlanLimits, metric: UsageMetric) -> i64 {
    match metric {
        UsageMetric::Messages => limits.max_messages,
        UsageMetric::Documents => limits.max_documents,
        UsageMetric::StorageBytes => limits.max_storage_bytes,
    }
}

/// 检查再消耗 `amount` 是否超出套餐限额
pub fn check_limit(limits: &PlanLimits, usage: &UsageCounters, metric: UsageMetric, amount: i64) -> LimitCheck {
    let limit = limit_for(limits, metric);
    let current = usage.get(metric);
    LimitCheck {
        metric,
        current,
        limit,
        requested: amount,
        allowed: limit <= 0 || current.saturating_add(amount) <= limit,
    }
}

/// 用量概览
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UsageSummary {
    pub tenant_id: Uuid,
    pub plan_code: String,
    pub usage: UsageCounters,
    pub limits: PlanLimits,
    pub checks: Vec<LimitCheck>,
}

/// 用量服务
pub struct UsageService {
    db: Arc<DatabaseConnection>,
    subscriptions: SubscriptionService,
}

impl UsageService {
    pub fn new(db: Arc<DatabaseConnection>, subscriptions: SubscriptionService) -> Self {
        Self { db, subscriptions }
    }

    /// 在事务中对当前订阅累加用量
    #[instrument(skip(self))]
    pub async fn record(&self, tenant_id: Uuid, deltas: &[(UsageMetric, i64)]) -> PlatformResult<Option<UsageCounters>> {
        let txn = self.db.begin().await?;

        let Some(current) = Subscription::find()
            .filter(subscription::Column::TenantId.eq(tenant_id))
            .order_by_desc(subscription::Column::CreatedAt)
            .lock_exclusive()
            .one(&txn)
            .await?
        else {
            txn.rollback().await?;
            warn!(tenant_id = %tenant_id, "租户没有订阅，忽略用量");
            return Ok(None);
        };

        let mut usage = UsageCounters::from_json(&current.usage);
        for (metric, delta) in deltas {
            usage.apply(*metric, *delta);
        }

        let mut active: subscription::ActiveModel = current.into();
        active.usage = Set(usage.to_json());
        active.updated_at = Set(Utc::now().into());
        active.update(&txn).await?;
        txn.commit().await?;

        info!(tenant_id = %tenant_id, messages = usage.messages, documents = usage.documents, storage_bytes = usage.storage_bytes, "用量已更新");
        Ok(Some(usage))
    }

    /// 订阅可用且本次消耗不超限，否则返回 402
    #[instrument(skip(self))]
    pub async fn ensure_can_consume(&self, tenant_id: Uuid, metric: UsageMetric, amount: i64) -> PlatformResult<LimitCheck> {
        let current = self
            .subscriptions
            .current(tenant_id)
            .await?
            .filter(|s| s.status.is_live())
            .ok_or_else(|| PlatformError::payment_required("没有可用的订阅"))?;

        let plan = Plan::find_by_id(current.plan_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| PlatformError::not_found(format!("套餐 {}", current.plan_id)))?;

        let check = check_limit(&plan.limits(), &UsageCounters::from_json(&current.usage), metric, amount);
        if !check.allowed {
            warn!(tenant_id = %tenant_id, metric = metric.as_str(), current = check.current, limit = check.limit, "用量超限");
            return Err(PlatformError::usage_limit(
                metric.as_str(),
                format!("{} 已达到套餐上限 {}", metric.as_str(), check.limit),
            ));
        }
        Ok(check)
    }

    pub async fn summary(&self, tenant_id: Uuid) -> PlatformResult<UsageSummary> {
        let current = self
            .subscriptions
            .current(tenant_id)
            .await?
            .ok_or_else(|| PlatformError::not_found(format!("租户 {} 的订阅", tenant_id)))?;
        let plan = Plan::find_by_id(current.plan_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| PlatformError::not_found(format!("套餐 {}", current.plan_id)))?;

        let usage = UsageCounters::from_json(&current.usage);
        let limits = plan.limits();
        let checks = [UsageMetric::Messages, UsageMetric::Documents, UsageMetric::StorageBytes]
            .into_iter()
            .map(|metric| check_limit(&limits, &usage, metric, 0))
            .collect();

        Ok(UsageSummary {
            tenant_id,
            plan_code: plan.code,
            usage,
            limits,
            checks,
        })
    }

    /// 清零所有可用订阅的当期用量
    #[instrument(skip(self))]
    pub async fn reset_all(&self) -> PlatformResult<u64> {
        let result = Subscription::update_many()
            .col_expr(subscription::Column::Usage, Expr::value(UsageCounters::default().to_json()))
            .col_expr(subscription::Column::UpdatedAt, Expr::value(chrono::DateTime::<chrono::FixedOffset>::from(Utc::now())))
            .filter(subscription::Column::Status.is_in([
                subscription::SubscriptionStatus::Trialing,
                subscription::SubscriptionStatus::Active,
            ]))
            .exec(self.db.as_ref())
            .await?;

        info!(subscriptions = result.rows_affected, "月度用量已重置");
        Ok(result.rows_affected)
    }
}

/// 用量事件负载
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UsageEventPayload {
    #[serde(default = "default_count")]
    pub count: i64,
    #[serde(default)]
    pub bytes: i64,
}

fn default_count() -> i64 {
    1
}

/// 路由键对应的用量增量
pub fn usage_deltas(routing_key: &str, payload: &UsageEventPayload) -> Option<Vec<(UsageMetric, i64)>> {
    let count = payload.count.max(0);
    let bytes = payload.bytes.max(0);
    let deltas = match routing_key {
        routing::USAGE_MESSAGE_ADDED => vec![(UsageMetric::Messages, count)],
        routing::USAGE_DOCUMENT_ADDED => vec![(UsageMetric::Documents, count), (UsageMetric::StorageBytes, bytes)],
        routing::USAGE_DOCUMENT_REMOVED => vec![(UsageMetric::Documents, -count), (UsageMetric::StorageBytes, -bytes)],
        _ => return None,
    };
    Some(deltas)
}

/// 消费 `usage.events`
pub struct UsageEventHandler {
    usage: std::sync::Arc<UsageService>,
}

impl UsageEventHandler {
    pub fn new(usage: std::sync::Arc<UsageService>) -> Self {
        Self { usage }
    }
}

#[async_trait]
impl EventHandler for UsageEventHandler {
    fn name(&self) -> &'static str {
        "billing.usage"
    }

    fn bindings(&self) -> Vec<Binding> {
        vec![Binding::new(USAGE_EXCHANGE, "usage.#")]
    }

    async fn handle(&self, event: &EventEnvelope) -> PlatformResult<()> {
        let tenant_id = event
            .tenant_id
            .ok_or_else(|| PlatformError::validation("tenant_id", "用量事件缺少租户"))?;
        let payload: UsageEventPayload = event.payload_as()?;

        let Some(deltas) = usage_deltas(&event.event_type, &payload) else {
            warn!(event_type = %event.event_type, "未知的用量事件");
            return Ok(());
        };

        self.usage.record(tenant_id, &deltas).await?;
        Ok(())
    }
}
