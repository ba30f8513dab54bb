// 订阅仓储实现

use crate::db::entities::{prelude::*, subscription};
use crate::errors::PlatformError;
use sea_orm::*;
use uuid::Uuid;

/// 订阅仓储
pub struct SubscriptionRepository;

impl SubscriptionRepository {
    /// 租户最近创建的订阅
    pub async fn latest_for_tenant<C: ConnectionTrait>(
        db: &C,
        tenant_id: Uuid,
    ) -> Result<Option<subscription::Model>, PlatformError> {
        Ok(Subscription::find()
            .filter(subscription::Column::TenantId.eq(tenant_id))
            .order_by_desc(subscription::Column::CreatedAt)
            .one(db)
            .await?)
    }

    pub async fn count_for_tenant<C: ConnectionTrait>(db: &C, tenant_id: Uuid) -> Result<u64, PlatformError> {
        Ok(Subscription::find()
            .filter(subscription::Column::TenantId.eq(tenant_id))
            .count(db)
            .await?)
    }

    pub async fn find_by_id<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
    ) -> Result<Option<subscription::Model>, PlatformError> {
        Ok(Subscription::find_by_id(id).one(db).await?)
    }
}
