// 文档上传与摄取任务
// 文档写入对象存储后创建摄取任务，任务状态由摄取 worker 回报

use super::storage::{content_type_for, document_key, sanitize_file_name, validate_upload, ObjectStore};
use crate::config::StorageConfig;
use crate::db::entities::{
    document::{self, DocumentStatus},
    ingestion_job::{self, JobStatus, SourceType},
    prelude::*,
};
use crate::errors::{PlatformError, PlatformResult};
use crate::messaging::topics::routing;
use crate::messaging::{publish_event, MessageBroker};
use crate::services::billing::usage::{UsageMetric, UsageService};
use chatwise_common::{EventEnvelope, PaginatedResponse, PaginationParams};
use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DocumentView {
    pub id: Uuid,
    pub file_name: String,
    pub storage_key: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub status: DocumentStatus,
    pub created_at: DateTime<FixedOffset>,
}

impl From<document::Model> for DocumentView {
    fn from(model: document::Model) -> Self {
        Self {
            id: model.id,
            file_name: model.file_name,
            storage_key: model.storage_key,
            content_type: model.content_type,
            size_bytes: model.size_bytes,
            status: model.status,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct IngestionJobView {
    pub id: Uuid,
    pub document_id: Option<Uuid>,
    pub source_type: SourceType,
    pub source: String,
    pub status: JobStatus,
    pub error: Option<String>,
    pub chunks_indexed: i32,
    pub started_at: Option<DateTime<FixedOffset>>,
    pub completed_at: Option<DateTime<FixedOffset>>,
    pub created_at: DateTime<FixedOffset>,
}

impl From<ingestion_job::Model> for IngestionJobView {
    fn from(model: ingestion_job::Model) -> Self {
        Self {
            id: model.id,
            document_id: model.document_id,
            source_type: model.source_type,
            source: model.source,
            status: model.status,
            error: model.error,
            chunks_indexed: model.chunks_indexed,
            started_at: model.started_at,
            completed_at: model.completed_at,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UploadResponse {
    pub document: DocumentView,
    pub job: IngestionJobView,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UrlIngestionRequest {
    pub url: String,
}

/// 摄取 worker 回报的状态
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct JobStatusUpdate {
    pub status: JobStatus,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub chunks_indexed: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct JobQuery {
    pub status: Option<JobStatus>,
    pub page: Option<u64>,
    pub page_size: Option<u64>,
}

/// 只接受 http/https 网页地址
pub fn validate_source_url(raw: &str) -> PlatformResult<url::Url> {
    let parsed = url::Url::parse(raw.trim()).map_err(|e| PlatformError::validation("url", format!("URL 无效: {}", e)))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(PlatformError::validation("url", "只支持 http/https 地址"));
    }
    Ok(parsed)
}

pub struct IngestionService {
    db: Arc<DatabaseConnection>,
    broker: Arc<dyn MessageBroker>,
    store: Arc<dyn ObjectStore>,
    usage: Arc<UsageService>,
    config: StorageConfig,
}

impl IngestionService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        broker: Arc<dyn MessageBroker>,
        store: Arc<dyn ObjectStore>,
        usage: Arc<UsageService>,
        config: StorageConfig,
    ) -> Self {
        Self {
            db,
            broker,
            store,
            usage,
            config,
        }
    }

    /// 上传文档并排队摄取
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub async fn upload_document(
        &self,
        tenant_id: Uuid,
        file_name: &str,
        content_type: Option<String>,
        bytes: Vec<u8>,
    ) -> PlatformResult<(document::Model, ingestion_job::Model)> {
        let size = bytes.len() as u64;
        let ext = validate_upload(&self.config, file_name, size)?;
        self.usage.ensure_can_consume(tenant_id, UsageMetric::Documents, 1).await?;
        self.usage.ensure_can_consume(tenant_id, UsageMetric::StorageBytes, size as i64).await?;

        let document_id = Uuid::new_v4();
        let key = document_key(tenant_id, document_id, file_name);
        let content_type = content_type
            .filter(|ct| !ct.is_empty() && ct != "application/octet-stream")
            .unwrap_or_else(|| content_type_for(&ext).to_string());
        self.store.put(&key, &content_type, bytes).await?;

        let now = Utc::now();
        let txn = self.db.begin().await?;
        let document = document::ActiveModel {
            id: Set(document_id),
            tenant_id: Set(tenant_id),
            file_name: Set(sanitize_file_name(file_name)),
            storage_key: Set(key.clone()),
            content_type: Set(content_type),
            size_bytes: Set(size as i64),
            status: Set(DocumentStatus::Active),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(&txn)
        .await?;
        let job = Self::new_job(tenant_id, Some(document_id), SourceType::Document, key)
            .insert(&txn)
            .await?;
        txn.commit().await?;

        self.publish_ingestion(&job).await?;
        let added = EventEnvelope::new(
            routing::USAGE_DOCUMENT_ADDED,
            Some(tenant_id),
            json!({ "document_id": document.id, "count": 1, "bytes": document.size_bytes }),
        )
        .with_idempotency_key(format!("usage:document-added:{}", document.id));
        publish_event(self.broker.as_ref(), routing::USAGE_DOCUMENT_ADDED, &added).await?;

        info!(tenant_id = %tenant_id, document_id = %document.id, job_id = %job.id, "文档已上传并排队摄取");
        Ok((document, job))
    }

    fn new_job(tenant_id: Uuid, document_id: Option<Uuid>, source_type: SourceType, source: String) -> ingestion_job::ActiveModel {
        let now = Utc::now();
        ingestion_job::ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(tenant_id),
            document_id: Set(document_id),
            source_type: Set(source_type),
            source: Set(source),
            status: Set(JobStatus::Queued),
            error: Set(None),
            chunks_indexed: Set(0),
            started_at: Set(None),
            completed_at: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
    }

    async fn publish_ingestion(&self, job: &ingestion_job::Model) -> PlatformResult<()> {
        let event = EventEnvelope::new(
            routing::INGESTION_REQUESTED,
            Some(job.tenant_id),
            json!({
                "job_id": job.id,
                "document_id": job.document_id,
                "source_type": job.source_type,
                "source": job.source,
            }),
        )
        .with_idempotency_key(format!("ingestion:{}", job.id));
        publish_event(self.broker.as_ref(), routing::INGESTION_REQUESTED, &event).await
    }

    /// 网页来源摄取
    #[instrument(skip(self))]
    pub async fn ingest_url(&self, tenant_id: Uuid, raw_url: &str) -> PlatformResult<ingestion_job::Model> {
        let url = validate_source_url(raw_url)?;
        let job = Self::new_job(tenant_id, None, SourceType::Url, url.to_string())
            .insert(self.db.as_ref())
            .await?;
        self.publish_ingestion(&job).await?;
        info!(tenant_id = %tenant_id, job_id = %job.id, "网页摄取已排队");
        Ok(job)
    }

    pub async fn list_documents(
        &self,
        tenant_id: Uuid,
        pagination: &PaginationParams,
    ) -> PlatformResult<PaginatedResponse<document::Model>> {
        let paginator = Document::find()
            .filter(document::Column::TenantId.eq(tenant_id))
            .filter(document::Column::Status.eq(DocumentStatus::Active))
            .order_by_desc(document::Column::CreatedAt)
            .paginate(self.db.as_ref(), pagination.page_size());
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(pagination.page_index()).await?;
        Ok(PaginatedResponse::new(items, total, pagination.page(), pagination.page_size()))
    }

    pub async fn get_document(&self, tenant_id: Uuid, document_id: Uuid) -> PlatformResult<document::Model> {
        Document::find_by_id(document_id)
            .filter(document::Column::TenantId.eq(tenant_id))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| PlatformError::not_found(format!("文档 {}", document_id)))
    }

    /// 删除文档
    ///
    /// 已删除的文档仍会清理存储并重发用量事件，幂等键保证下游只计一次
    #[instrument(skip(self))]
    pub async fn delete_document(&self, tenant_id: Uuid, document_id: Uuid) -> PlatformResult<document::Model> {
        let mut document = self.get_document(tenant_id, document_id).await?;
        if document.status != DocumentStatus::Deleted {
            let mut active: document::ActiveModel = document.into();
            active.status = Set(DocumentStatus::Deleted);
            active.updated_at = Set(Utc::now().into());
            document = active.update(self.db.as_ref()).await?;
        }

        if let Err(e) = self.store.delete(&document.storage_key).await {
            warn!(document_id = %document.id, error = %e, "删除存储对象失败，保留孤儿对象");
        }

        let removed = EventEnvelope::new(
            routing::USAGE_DOCUMENT_REMOVED,
            Some(tenant_id),
            json!({ "document_id": document.id, "count": 1, "bytes": document.size_bytes }),
        )
        .with_idempotency_key(format!("usage:document-removed:{}", document.id));
        publish_event(self.broker.as_ref(), routing::USAGE_DOCUMENT_REMOVED, &removed).await?;

        info!(tenant_id = %tenant_id, document_id = %document.id, "文档已删除");
        Ok(document)
    }

    pub async fn list_jobs(&self, tenant_id: Uuid, query: &JobQuery) -> PlatformResult<PaginatedResponse<ingestion_job::Model>> {
        let pagination = PaginationParams {
            page: query.page,
            page_size: query.page_size,
        };
        let mut select = IngestionJob::find().filter(ingestion_job::Column::TenantId.eq(tenant_id));
        if let Some(status) = query.status {
            select = select.filter(ingestion_job::Column::Status.eq(status));
        }
        let paginator = select
            .order_by_desc(ingestion_job::Column::CreatedAt)
            .paginate(self.db.as_ref(), pagination.page_size());
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(pagination.page_index()).await?;
        Ok(PaginatedResponse::new(items, total, pagination.page(), pagination.page_size()))
    }

    pub async fn get_job(&self, tenant_id: Uuid, job_id: Uuid) -> PlatformResult<ingestion_job::Model> {
        IngestionJob::find_by_id(job_id)
            .filter(ingestion_job::Column::TenantId.eq(tenant_id))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| PlatformError::not_found(format!("摄取任务 {}", job_id)))
    }

    /// 更新任务状态：QUEUED → RUNNING → COMPLETED | FAILED
    #[instrument(skip(self, update), fields(status = ?update.status))]
    pub async fn update_job_status(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        update: JobStatusUpdate,
    ) -> PlatformResult<ingestion_job::Model> {
        let job = self.get_job(tenant_id, job_id).await?;
        if !job.status.can_transition_to(update.status) {
            return Err(PlatformError::conflict(format!(
                "摄取任务不能从 {:?} 变为 {:?}",
                job.status, update.status
            )));
        }

        let now = Utc::now();
        let mut active: ingestion_job::ActiveModel = job.into();
        active.status = Set(update.status);
        match update.status {
            JobStatus::Running => active.started_at = Set(Some(now.into())),
            JobStatus::Completed | JobStatus::Failed => active.completed_at = Set(Some(now.into())),
            JobStatus::Queued => {}
        }
        if update.status == JobStatus::Failed {
            active.error = Set(Some(update.error.unwrap_or_else(|| "未知错误".to_string())));
        }
        if let Some(chunks) = update.chunks_indexed {
            active.chunks_indexed = Set(chunks.max(0));
        }
        active.updated_at = Set(now.into());

        let job = active.update(self.db.as_ref()).await?;
        info!(tenant_id = %tenant_id, job_id = %job.id, status = ?job.status, "摄取任务状态已更新");
        Ok(job)
    }
}
