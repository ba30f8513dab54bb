// 种子数据管理
// 安装默认套餐，已存在的套餐代码会被跳过

use crate::db::entities::plan::{self, BillingInterval, PlanLimits};
use crate::db::repositories::PlanRepository;
use crate::errors::PlatformError;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use tracing::{info, instrument};
use uuid::Uuid;
use std::sync::Arc;

/// 默认套餐定义
#[derive(Debug, Clone)]
pub struct PlanSeed {
    pub code: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub price_minor: i64,
    pub limits: PlanLimits,
}

/// 平台默认套餐
pub fn default_plans() -> Vec<PlanSeed> {
    vec![
        PlanSeed {
            code: "starter",
            name: "Starter",
            description: "试用与小型站点",
            price_minor: 0,
            limits: PlanLimits {
                max_messages: 500,
                max_documents: 20,
                max_storage_bytes: 50 * 1024 * 1024,
            },
        },
        PlanSeed {
            code: "growth",
            name: "Growth",
            description: "成长型团队",
            price_minor: 1_500_000,
            limits: PlanLimits {
                max_messages: 10_000,
                max_documents: 500,
                max_storage_bytes: 2 * 1024 * 1024 * 1024,
            },
        },
        PlanSeed {
            code: "business",
            name: "Business",
            description: "不限消息量",
            price_minor: 5_000_000,
            limits: PlanLimits {
                max_messages: 0,
                max_documents: 5_000,
                max_storage_bytes: 20 * 1024 * 1024 * 1024,
            },
        },
    ]
}

/// 种子数据管理器
pub struct SeedDataManager {
    db: Arc<DatabaseConnection>,
    currency: String,
}

impl SeedDataManager {
    pub fn new(db: Arc<DatabaseConnection>, currency: impl Into<String>) -> Self {
        Self {
            db,
            currency: currency.into(),
        }
    }

    /// 安装默认套餐，返回新建的套餐代码
    #[instrument(skip(self))]
    pub async fn seed_all(&self) -> Result<Vec<String>, PlatformError> {
        let mut created = Vec::new();

        for seed in default_plans() {
            if PlanRepository::find_by_code(self.db.as_ref(), seed.code).await?.is_some() {
                continue;
            }

            let now = Utc::now();
            plan::ActiveModel {
                id: Set(Uuid::new_v4()),
                code: Set(seed.code.to_string()),
                name: Set(seed.name.to_string()),
                description: Set(Some(seed.description.to_string())),
                price_minor: Set(seed.price_minor),
                currency: Set(self.currency.clone()),
                billing_interval: Set(BillingInterval::Monthly),
                limits: Set(serde_json::to_value(seed.limits)?),
                is_active: Set(true),
                paystack_plan_code: Set(None),
                created_at: Set(now.into()),
                updated_at: Set(now.into()),
            }
            .insert(self.db.as_ref())
            .await?;

            created.push(seed.code.to_string());
        }

        info!(created = ?created, "默认套餐初始化完成");
        Ok(created)
    }
}
