// 套餐仓储实现

use crate::db::entities::{plan, prelude::*};
use crate::errors::PlatformError;
use sea_orm::*;
use uuid::Uuid;

/// 套餐仓储
pub struct PlanRepository;

impl PlanRepository {
    pub async fn find_by_id<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<Option<plan::Model>, PlatformError> {
        Ok(Plan::find_by_id(id).one(db).await?)
    }

    pub async fn get<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<plan::Model, PlatformError> {
        Self::find_by_id(db, id)
            .await?
            .ok_or_else(|| PlatformError::not_found(format!("套餐 {}", id)))
    }

    pub async fn find_by_code<C: ConnectionTrait>(
        db: &C,
        code: &str,
    ) -> Result<Option<plan::Model>, PlatformError> {
        Ok(Plan::find()
            .filter(plan::Column::Code.eq(code))
            .one(db)
            .await?)
    }

    /// 按价格升序列出套餐
    pub async fn list<C: ConnectionTrait>(db: &C, include_inactive: bool) -> Result<Vec<plan::Model>, PlatformError> {
        let mut query = Plan::find();
        if !include_inactive {
            query = query.filter(plan::Column::IsActive.eq(true));
        }
        Ok(query.order_by_asc(plan::Column::PriceMinor).all(db).await?)
    }
}
