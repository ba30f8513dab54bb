// 通知服务
// 按幂等键去重的邮件发送、失败重发与发送日志

use super::brevo::{EmailAddress, EmailSender, OutgoingEmail};
use super::templates::{variables_from_json, EmailTemplate};
use crate::db::entities::{
    notification_log::{self, NotificationStatus},
    prelude::*,
};
use crate::errors::{PlatformError, PlatformResult};
use chatwise_common::{PaginatedResponse, PaginationParams};
use chrono::{DateTime, FixedOffset, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use sea_orm::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

/// 邮件发送请求，也是 `email.send` 队列的消息负载
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SendEmailRequest {
    #[serde(default)]
    pub tenant_id: Option<Uuid>,
    pub template: EmailTemplate,
    pub to: String,
    #[serde(default)]
    pub to_name: Option<String>,
    /// 模板变量
    #[serde(default)]
    pub variables: serde_json::Value,
    /// 未提供时每次请求都视为新邮件
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl SendEmailRequest {
    pub fn new(tenant_id: Option<Uuid>, template: EmailTemplate, to: impl Into<String>, variables: serde_json::Value) -> Self {
        Self {
            tenant_id,
            template,
            to: to.into(),
            to_name: None,
            variables,
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

static EMAIL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s.]+(\.[^@\s.]+)+$").expect("邮箱正则有效"));

/// 邮箱格式粗校验
pub fn is_valid_email(email: &str) -> bool {
    EMAIL_PATTERN.is_match(email)
}

/// 日志查询参数
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct LogQuery {
    pub status: Option<NotificationStatus>,
    pub page: Option<u64>,
    pub page_size: Option<u64>,
}

/// 通知日志视图
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct NotificationLogView {
    pub id: Uuid,
    pub template: String,
    pub recipient: String,
    pub subject: String,
    pub status: NotificationStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub provider_message_id: Option<String>,
    pub sent_at: Option<DateTime<FixedOffset>>,
    pub created_at: DateTime<FixedOffset>,
}

impl From<notification_log::Model> for NotificationLogView {
    fn from(model: notification_log::Model) -> Self {
        Self {
            id: model.id,
            template: model.template,
            recipient: model.recipient,
            subject: model.subject,
            status: model.status,
            attempts: model.attempts,
            last_error: model.last_error,
            provider_message_id: model.provider_message_id,
            sent_at: model.sent_at,
            created_at: model.created_at,
        }
    }
}

/// 重发统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct RetrySummary {
    pub attempted: u32,
    pub sent: u32,
    pub failed: u32,
}

pub struct NotificationService {
    db: Arc<DatabaseConnection>,
    sender: Arc<dyn EmailSender>,
    max_attempts: i32,
}

impl NotificationService {
    pub fn new(db: Arc<DatabaseConnection>, sender: Arc<dyn EmailSender>, max_attempts: i32) -> Self {
        Self {
            db,
            sender,
            max_attempts: max_attempts.max(1),
        }
    }

    /// 发送邮件；同一幂等键最多成功发送一次。发送失败记入日志，由重发任务处理
    #[instrument(skip(self, request), fields(template = request.template.as_str()))]
    pub async fn send(&self, request: SendEmailRequest) -> PlatformResult<notification_log::Model> {
        if !is_valid_email(&request.to) {
            return Err(PlatformError::validation("to", "收件人邮箱格式不正确"));
        }
        let rendered = request.template.render(&variables_from_json(&request.variables))?;
        let key = request
            .idempotency_key
            .clone()
            .unwrap_or_else(|| format!("email:{}", Uuid::new_v4()));

        let existing = NotificationLog::find()
            .filter(notification_log::Column::IdempotencyKey.eq(key.as_str()))
            .one(self.db.as_ref())
            .await?;

        let log = match existing {
            Some(log) if log.status == NotificationStatus::Sent => {
                debug!(idempotency_key = %key, "邮件已发送过，跳过");
                return Ok(log);
            }
            Some(log) if log.attempts >= self.max_attempts => {
                warn!(idempotency_key = %key, attempts = log.attempts, "邮件重试次数已用尽");
                return Ok(log);
            }
            Some(log) => log,
            None => {
                let now = Utc::now();
                notification_log::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    tenant_id: Set(request.tenant_id),
                    channel: Set("email".to_string()),
                    template: Set(request.template.as_str().to_string()),
                    recipient: Set(request.to.clone()),
                    subject: Set(rendered.subject),
                    body: Set(rendered.html),
                    status: Set(NotificationStatus::Pending),
                    provider_message_id: Set(None),
                    attempts: Set(0),
                    last_error: Set(None),
                    idempotency_key: Set(key),
                    sent_at: Set(None),
                    created_at: Set(now.into()),
                    updated_at: Set(now.into()),
                }
                .insert(self.db.as_ref())
                .await?
            }
        };

        self.deliver(log, request.to_name).await
    }

    /// 投递一条日志对应的邮件并记录结果
    async fn deliver(&self, log: notification_log::Model, to_name: Option<String>) -> PlatformResult<notification_log::Model> {
        let email = OutgoingEmail {
            to: EmailAddress {
                email: log.recipient.clone(),
                name: to_name,
            },
            subject: log.subject.clone(),
            html: log.body.clone(),
            tags: vec![log.template.clone()],
        };
        let result = self.sender.send(&email).await;

        let now = Utc::now();
        let attempts = log.attempts + 1;
        let log_id = log.id;
        let mut active: notification_log::ActiveModel = log.into();
        active.attempts = Set(attempts);
        active.updated_at = Set(now.into());
        match result {
            Ok(message_id) => {
                info!(log_id = %log_id, message_id = %message_id, "邮件发送成功");
                active.status = Set(NotificationStatus::Sent);
                active.provider_message_id = Set(Some(message_id));
                active.last_error = Set(None);
                active.sent_at = Set(Some(now.into()));
            }
            Err(e) => {
                warn!(log_id = %log_id, attempts, error = %e, "邮件发送失败");
                active.status = Set(NotificationStatus::Failed);
                active.last_error = Set(Some(e.to_string()));
            }
        }

        Ok(active.update(self.db.as_ref()).await?)
    }

    /// 重发未达到尝试上限的失败邮件
    #[instrument(skip(self))]
    pub async fn retry_failed(&self) -> PlatformResult<RetrySummary> {
        let failed = NotificationLog::find()
            .filter(notification_log::Column::Status.eq(NotificationStatus::Failed))
            .filter(notification_log::Column::Attempts.lt(self.max_attempts))
            .order_by_asc(notification_log::Column::UpdatedAt)
            .limit(100)
            .all(self.db.as_ref())
            .await?;

        let mut summary = RetrySummary::default();
        for log in failed {
            summary.attempted += 1;
            match self.deliver(log, None).await?.status {
                NotificationStatus::Sent => summary.sent += 1,
                _ => summary.failed += 1,
            }
        }

        if summary.attempted > 0 {
            info!(attempted = summary.attempted, sent = summary.sent, failed = summary.failed, "失败邮件重发完成");
        }
        Ok(summary)
    }

    pub async fn list_logs(&self, tenant_id: Uuid, query: &LogQuery) -> PlatformResult<PaginatedResponse<notification_log::Model>> {
        let pagination = PaginationParams {
            page: query.page,
            page_size: query.page_size,
        };
        let mut select = NotificationLog::find().filter(notification_log::Column::TenantId.eq(tenant_id));
        if let Some(status) = query.status {
            select = select.filter(notification_log::Column::Status.eq(status));
        }

        let paginator = select
            .order_by_desc(notification_log::Column::CreatedAt)
            .paginate(self.db.as_ref(), pagination.page_size());
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(pagination.page_index()).await?;
        Ok(PaginatedResponse::new(items, total, pagination.page(), pagination.page_size()))
    }

    pub async fn get_log(&self, tenant_id: Uuid, log_id: Uuid) -> PlatformResult<notification_log::Model> {
        NotificationLog::find_by_id(log_id)
            .filter(notification_log::Column::TenantId.eq(tenant_id))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| PlatformError::not_found(format!("通知日志 {}", log_id)))
    }
}
