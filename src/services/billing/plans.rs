// 套餐管理

use crate::db::entities::{plan, plan::BillingInterval, plan::PlanLimits};
use crate::db::PlanRepository;
use crate::errors::{PlatformError, PlatformResult};
use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::*;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use std::sync::Arc;

/// 创建套餐请求
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreatePlanRequest {
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub price_minor: i64,
    pub currency: Option<String>,
    pub billing_interval: BillingInterval,
    #[serde(default)]
    pub limits: PlanLimits,
    pub paystack_plan_code: Option<String>,
}

/// 更新套餐请求
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct UpdatePlanRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price_minor: Option<i64>,
    pub limits: Option<PlanLimits>,
    pub is_active: Option<bool>,
}

/// 套餐视图
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PlanView {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub price_minor: i64,
    pub currency: String,
    pub billing_interval: BillingInterval,
    pub limits: PlanLimits,
    pub is_active: bool,
    pub created_at: DateTime<FixedOffset>,
}

impl From<plan::Model> for PlanView {
    fn from(model: plan::Model) -> Self {
        Self {
            limits: model.limits(),
            id: model.id,
            code: model.code,
            name: model.name,
            description: model.description,
            price_minor: model.price_minor,
            currency: model.currency,
            billing_interval: model.billing_interval,
            is_active: model.is_active,
            created_at: model.created_at,
        }
    }
}

/// 套餐代码：2-32 位小写字母、数字、连字符或下划线
pub fn validate_plan_code(code: &str) -> PlatformResult<()> {
    let valid = (2..=32).contains(&code.len())
        && code
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(PlatformError::validation("code", "套餐代码只能包含小写字母、数字、- 和 _，长度 2-32"))
    }
}

fn validate_amounts(price_minor: i64, limits: &PlanLimits) -> PlatformResult<()> {
    if price_minor < 0 {
        return Err(PlatformError::validation("price_minor", "价格不能为负数"));
    }
    if limits.max_messages < 0 || limits.max_documents < 0 || limits.max_storage_bytes < 0 {
        return Err(PlatformError::validation("limits", "用量限制不能为负数"));
    }
    Ok(())
}

/// 套餐服务
pub struct PlanService {
    db: Arc<DatabaseConnection>,
    default_currency: String,
}

impl PlanService {
    pub fn new(db: Arc<DatabaseConnection>, default_currency: impl Into<String>) -> Self {
        Self {
            db,
            default_currency: default_currency.into(),
        }
    }

    #[instrument(skip(self, request), fields(code = %request.code))]
    pub async fn create(&self, request: CreatePlanRequest) -> PlatformResult<plan::Model> {
        validate_plan_code(&request.code)?;
        validate_amounts(request.price_minor, &request.limits)?;
        if request.name.trim().is_empty() {
            return Err(PlatformError::validation("name", "套餐名称不能为空"));
        }
        if PlanRepository::find_by_code(self.db.as_ref(), &request.code).await?.is_some() {
            return Err(PlatformError::conflict(format!("套餐代码 {} 已存在", request.code)));
        }

        let now = Utc::now();
        let model = plan::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(request.code),
            name: Set(request.name.trim().to_string()),
            description: Set(request.description),
            price_minor: Set(request.price_minor),
            currency: Set(request.currency.unwrap_or_else(|| self.default_currency.clone())),
            billing_interval: Set(request.billing_interval),
            limits: Set(serde_json::to_value(request.limits)?),
            is_active: Set(true),
            paystack_plan_code: Set(request.paystack_plan_code),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(self.db.as_ref())
        .await?;

        info!(plan_id = %model.id, code = %model.code, "套餐已创建");
        Ok(model)
    }

    pub async fn list(&self, include_inactive: bool) -> PlatformResult<Vec<plan::Model>> {
        PlanRepository::list(self.db.as_ref(), include_inactive).await
    }

    pub async fn get(&self, plan_id: Uuid) -> PlatformResult<plan::Model> {
        PlanRepository::get(self.db.as_ref(), plan_id).await
    }

    #[instrument(skip(self, request))]
    pub async fn update(&self, plan_id: Uuid, request: UpdatePlanRequest) -> PlatformResult<plan::Model> {
        let existing = PlanRepository::get(self.db.as_ref(), plan_id).await?;
        validate_amounts(
            request.price_minor.unwrap_or(existing.price_minor),
            &request.limits.unwrap_or_else(|| existing.limits()),
        )?;

        let mut active: plan::ActiveModel = existing.into();
        if let Some(name) = request.name {
            if name.trim().is_empty() {
                return Err(PlatformError::validation("name", "套餐名称不能为空"));
            }
            active.name = Set(name.trim().to_string());
        }
        if let Some(description) = request.description {
            active.description = Set(Some(description));
        }
        if let Some(price) = request.price_minor {
            active.price_minor = Set(price);
        }
        if let Some(limits) = request.limits {
            active.limits = Set(serde_json::to_value(limits)?);
        }
        if let Some(is_active) = request.is_active {
            active.is_active = Set(is_active);
        }
        active.updated_at = Set(Utc::now().into());

        let model = active.update(self.db.as_ref()).await?;
        info!(plan_id = %plan_id, "套餐已更新");
        Ok(model)
    }

    /// 停用后不再可选，已有订阅不受影响
    pub async fn deactivate(&self, plan_id: Uuid) -> PlatformResult<plan::Model> {
        self.update(
            plan_id,
            UpdatePlanRequest {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
    }
}
