// 租户注册与生命周期

use crate::db::entities::{prelude::*, tenant::{self, TenantStatus}};
use crate::db::repositories::{NewTenant, TenantRepository};
use crate::errors::{PlatformError, PlatformResult};
use crate::messaging::topics::routing;
use crate::messaging::{publish_event, MessageBroker};
use crate::services::communications::notification::is_valid_email;
use crate::services::workflow::tenant_webhook_url;
use chatwise_common::{EventEnvelope, PaginatedResponse, PaginationParams};
use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

/// 保留的租户标识符
pub const RESERVED_SLUGS: &[&str] = &[
    "admin", "api", "app", "auth", "billing", "chatwise", "dashboard", "docs", "help", "login", "status",
    "support", "www",
];

/// 标识符：3-63 位小写字母、数字和连字符，首尾不能是连字符，且不在保留列表中
pub fn validate_slug(slug: &str) -> PlatformResult<()> {
    let len = slug.len();
    if !(3..=63).contains(&len) {
        return Err(PlatformError::validation("slug", "标识符长度必须在 3 到 63 之间"));
    }
    if !slug.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return Err(PlatformError::validation("slug", "标识符只能包含小写字母、数字和连字符"));
    }
    if slug.starts_with('-') || slug.ends_with('-') {
        return Err(PlatformError::validation("slug", "标识符不能以连字符开头或结尾"));
    }
    if RESERVED_SLUGS.contains(&slug) {
        return Err(PlatformError::validation("slug", format!("标识符 {} 为保留字", slug)));
    }
    Ok(())
}

/// 租户设置必须是对象；其中的 webhook 地址须为公网 https 地址
pub fn validate_settings(settings: &serde_json::Value) -> PlatformResult<()> {
    if !settings.is_object() {
        return Err(PlatformError::validation("settings", "设置必须是 JSON 对象"));
    }
    tenant_webhook_url(settings)?;
    Ok(())
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RegisterTenantRequest {
    pub name: String,
    pub slug: String,
    pub contact_email: String,
    #[serde(default)]
    pub settings: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct UpdateTenantRequest {
    pub name: Option<String>,
    pub contact_email: Option<String>,
    pub settings: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TenantView {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub status: TenantStatus,
    pub contact_email: String,
    pub owner_user_id: Uuid,
    #[schema(value_type = Object)]
    pub settings: serde_json::Value,
    pub created_at: DateTime<FixedOffset>,
}

impl From<tenant::Model> for TenantView {
    fn from(model: tenant::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            slug: model.slug,
            status: model.status,
            contact_email: model.contact_email,
            owner_user_id: model.owner_user_id,
            settings: model.settings,
            created_at: model.created_at,
        }
    }
}

/// 注册租户的所有者
#[derive(Debug, Clone)]
pub struct TenantOwner {
    pub user_id: Uuid,
    pub email: Option<String>,
}

pub struct TenantService {
    db: Arc<DatabaseConnection>,
    broker: Arc<dyn MessageBroker>,
}

impl TenantService {
    pub fn new(db: Arc<DatabaseConnection>, broker: Arc<dyn MessageBroker>) -> Self {
        Self { db, broker }
    }

    /// 注册租户并发布 `tenant.created` 与所有者的 `user.created`
    #[instrument(skip(self, request, owner), fields(slug = %request.slug))]
    pub async fn register(&self, request: RegisterTenantRequest, owner: TenantOwner) -> PlatformResult<tenant::Model> {
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(PlatformError::validation("name", "租户名称不能为空"));
        }
        validate_slug(&request.slug)?;
        if !is_valid_email(&request.contact_email) {
            return Err(PlatformError::validation("contact_email", "联系邮箱格式不正确"));
        }
        let settings = request.settings.unwrap_or_else(|| json!({}));
        validate_settings(&settings)?;

        let tenant = TenantRepository::create(
            self.db.as_ref(),
            NewTenant {
                name,
                slug: request.slug,
                contact_email: request.contact_email,
                owner_user_id: owner.user_id,
                settings,
            },
        )
        .await?;

        let created = EventEnvelope::new(
            routing::TENANT_CREATED,
            Some(tenant.id),
            json!({
                "tenant_id": tenant.id,
                "name": tenant.name,
                "slug": tenant.slug,
                "contact_email": tenant.contact_email,
            }),
        )
        .with_idempotency_key(format!("tenant-created:{}", tenant.id));
        publish_event(self.broker.as_ref(), routing::TENANT_CREATED, &created).await?;

        let user = EventEnvelope::new(
            routing::USER_CREATED,
            Some(tenant.id),
            json!({
                "tenant_id": tenant.id,
                "user_id": owner.user_id.to_string(),
                "email": owner.email.unwrap_or_else(|| tenant.contact_email.clone()),
            }),
        )
        .with_idempotency_key(format!("user-created:{}:{}", tenant.id, owner.user_id));
        publish_event(self.broker.as_ref(), routing::USER_CREATED, &user).await?;

        info!(tenant_id = %tenant.id, "租户注册完成");
        Ok(tenant)
    }

    pub async fn get(&self, tenant_id: Uuid) -> PlatformResult<tenant::Model> {
        TenantRepository::get(self.db.as_ref(), tenant_id).await
    }

    pub async fn list(&self, pagination: &PaginationParams) -> PlatformResult<PaginatedResponse<tenant::Model>> {
        let paginator = Tenant::find()
            .order_by_desc(tenant::Column::CreatedAt)
            .paginate(self.db.as_ref(), pagination.page_size());
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(pagination.page_index()).await?;
        Ok(PaginatedResponse::new(items, total, pagination.page(), pagination.page_size()))
    }

    #[instrument(skip(self, request))]
    pub async fn update(&self, tenant_id: Uuid, request: UpdateTenantRequest) -> PlatformResult<tenant::Model> {
        let tenant = TenantRepository::get(self.db.as_ref(), tenant_id).await?;
        let mut active: tenant::ActiveModel = tenant.into();

        if let Some(name) = request.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(PlatformError::validation("name", "租户名称不能为空"));
            }
            active.name = Set(name);
        }
        if let Some(email) = request.contact_email {
            if !is_valid_email(&email) {
                return Err(PlatformError::validation("contact_email", "联系邮箱格式不正确"));
            }
            active.contact_email = Set(email);
        }
        if let Some(settings) = request.settings {
            validate_settings(&settings)?;
            active.settings = Set(settings);
        }
        active.updated_at = Set(Utc::now().into());

        let tenant = active.update(self.db.as_ref()).await?;
        info!(tenant_id = %tenant.id, "租户信息已更新");
        Ok(tenant)
    }

    pub async fn suspend(&self, tenant_id: Uuid) -> PlatformResult<tenant::Model> {
        self.set_status(tenant_id, TenantStatus::Suspended).await
    }

    pub async fn activate(&self, tenant_id: Uuid) -> PlatformResult<tenant::Model> {
        self.set_status(tenant_id, TenantStatus::Active).await
    }

    async fn set_status(&self, tenant_id: Uuid, status: TenantStatus) -> PlatformResult<tenant::Model> {
        let tenant = TenantRepository::get(self.db.as_ref(), tenant_id).await?;
        if tenant.status == status {
            return Ok(tenant);
        }
        TenantRepository::update_status(self.db.as_ref(), tenant_id, status).await
    }
}
