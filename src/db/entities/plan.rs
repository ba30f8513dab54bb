// 套餐实体定义

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// 计费周期
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema)]
#[sea_orm(rs_type = "String", db_type = "String(Some(32))")]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    #[sea_orm(string_value = "monthly")]
    Monthly,
    #[sea_orm(string_value = "annually")]
    Annually,
}

impl BillingInterval {
    /// 周期天数
    pub fn days(&self) -> i64 {
        match self {
            Self::Monthly => 30,
            Self::Annually => 365,
        }
    }
}

/// 套餐实体
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "plans")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// 套餐代码，例如 `starter`
    #[sea_orm(unique)]
    pub code: String,

    pub name: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,

    /// 价格（最小货币单位，如 kobo）
    pub price_minor: i64,

    pub currency: String,

    pub billing_interval: BillingInterval,

    /// 用量限制，见 `PlanLimits`
    #[sea_orm(column_type = "JsonBinary")]
    pub limits: Json,

    pub is_active: bool,

    /// Paystack 侧的套餐代码
    #[sea_orm(nullable)]
    pub paystack_plan_code: Option<String>,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::subscription::Entity")]
    Subscriptions,
}

impl Related<super::subscription::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Subscriptions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// 套餐用量限制，0 表示不限
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PlanLimits {
    #[serde(default)]
    pub max_messages: i64,
    #[serde(default)]
    pub max_documents: i64,
    #[serde(default)]
    pub max_storage_bytes: i64,
}

impl Model {
    /// 解析用量限制；无法解析时视为不限
    pub fn limits(&self) -> PlanLimits {
        serde_json::from_value(self.limits.clone()).unwrap_or_default()
    }
}
