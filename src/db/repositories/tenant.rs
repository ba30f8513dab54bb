// 租户仓储实现

use crate::db::entities::{prelude::*, tenant};
use crate::errors::PlatformError;
use chrono::Utc;
use sea_orm::*;
use tracing::{info, instrument};
use uuid::Uuid;

/// 新租户数据
#[derive(Debug, Clone)]
pub struct NewTenant {
    pub name: String,
    pub slug: String,
    pub contact_email: String,
    pub owner_user_id: Uuid,
    pub settings: serde_json::Value,
}

/// 租户仓储
pub struct TenantRepository;

impl TenantRepository {
    /// 创建新租户；slug 已存在时返回冲突
    #[instrument(skip(db, new_tenant), fields(slug = %new_tenant.slug))]
    pub async fn create<C: ConnectionTrait>(
        db: &C,
        new_tenant: NewTenant,
    ) -> Result<tenant::Model, PlatformError> {
        if Self::exists_by_slug(db, &new_tenant.slug).await? {
            return Err(PlatformError::conflict(format!(
                "租户标识符 '{}' 已存在",
                new_tenant.slug
            )));
        }

        let now = Utc::now();
        let model = tenant::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(new_tenant.name),
            slug: Set(new_tenant.slug),
            status: Set(tenant::TenantStatus::Active),
            contact_email: Set(new_tenant.contact_email),
            owner_user_id: Set(new_tenant.owner_user_id),
            settings: Set(new_tenant.settings),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        let result = model.insert(db).await?;
        info!(tenant_id = %result.id, "租户创建成功");
        Ok(result)
    }

    pub async fn find_by_id<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
    ) -> Result<Option<tenant::Model>, PlatformError> {
        Ok(Tenant::find_by_id(id).one(db).await?)
    }

    /// 查找租户，不存在时返回 NotFound
    pub async fn get<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<tenant::Model, PlatformError> {
        Self::find_by_id(db, id)
            .await?
            .ok_or_else(|| PlatformError::not_found(format!("租户 {}", id)))
    }

    pub async fn find_by_slug<C: ConnectionTrait>(
        db: &C,
        slug: &str,
    ) -> Result<Option<tenant::Model>, PlatformError> {
        Ok(Tenant::find()
            .filter(tenant::Column::Slug.eq(slug))
            .one(db)
            .await?)
    }

    pub async fn exists_by_slug<C: ConnectionTrait>(db: &C, slug: &str) -> Result<bool, PlatformError> {
        let count = Tenant::find()
            .filter(tenant::Column::Slug.eq(slug))
            .count(db)
            .await?;
        Ok(count > 0)
    }

    /// 更新租户状态
    #[instrument(skip(db))]
    pub async fn update_status<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
        status: tenant::TenantStatus,
    ) -> Result<tenant::Model, PlatformError> {
        let tenant = Self::get(db, id).await?;

        let mut active_model: tenant::ActiveModel = tenant.into();
        active_model.status = Set(status);
        active_model.updated_at = Set(Utc::now().into());

        let result = active_model.update(db).await?;
        info!(tenant_id = %result.id, status = ?status, "租户状态更新成功");
        Ok(result)
    }
}
