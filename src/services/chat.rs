// 聊天服务
// 会话与消息记录、用量校验、事件发布与统计

use crate::db::entities::{
    chat_message::{self, MessageRole},
    chat_session::{self, SessionStatus},
    prelude::*,
};
use crate::errors::{PlatformError, PlatformResult};
use crate::messaging::{publish_event, routing, MessageBroker};
use crate::services::billing::{UsageMetric, UsageService};
use chatwise_common::{EventEnvelope, PaginatedResponse, PaginationParams};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

/// 单条消息最大字符数
pub const MAX_MESSAGE_CHARS: usize = 4000;

/// 统计窗口上限（天）
pub const MAX_ANALYTICS_DAYS: i64 = 90;

/// 开始会话请求
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct StartSessionRequest {
    pub visitor_id: String,
    /// 渠道，默认 `web`
    pub channel: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// 用户消息
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PostMessageRequest {
    pub content: String,
}

/// 机器人回复
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct AssistantReplyRequest {
    pub content: String,
    /// 0.0 - 1.0
    pub confidence: Option<f64>,
    #[serde(default)]
    pub sources: Vec<String>,
}

/// 会话查询参数
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct SessionQuery {
    pub status: Option<SessionStatus>,
    pub page: Option<u64>,
    pub page_size: Option<u64>,
}

impl SessionQuery {
    pub fn pagination(&self) -> PaginationParams {
        PaginationParams {
            page: self.page,
            page_size: self.page_size,
        }
    }
}

/// 会话视图
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionView {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub visitor_id: String,
    pub channel: String,
    pub status: SessionStatus,
    pub message_count: i32,
    pub started_at: DateTime<FixedOffset>,
    pub ended_at: Option<DateTime<FixedOffset>>,
}

impl From<chat_session::Model> for SessionView {
    fn from(model: chat_session::Model) -> Self {
        Self {
            id: model.id,
            tenant_id: model.tenant_id,
            visitor_id: model.visitor_id,
            channel: model.channel,
            status: model.status,
            message_count: model.message_count,
            started_at: model.started_at,
            ended_at: model.ended_at,
        }
    }
}

/// 消息视图
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MessageView {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub confidence: Option<f64>,
    pub sources: Vec<String>,
    pub created_at: DateTime<FixedOffset>,
}

impl From<chat_message::Model> for MessageView {
    fn from(model: chat_message::Model) -> Self {
        Self {
            sources: serde_json::from_value(model.sources.clone()).unwrap_or_default(),
            id: model.id,
            session_id: model.session_id,
            role: model.role,
            content: model.content,
            confidence: model.confidence,
            created_at: model.created_at,
        }
    }
}

/// 每日消息数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub count: i64,
}

/// 聊天统计
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ChatAnalytics {
    pub tenant_id: Uuid,
    pub days: i64,
    pub sessions: u64,
    pub messages: u64,
    pub avg_messages_per_session: f64,
    pub messages_per_day: Vec<DailyCount>,
}

#[derive(Debug, FromQueryResult)]
struct DayRow {
    day: NaiveDate,
    count: i64,
}

/// 校验并裁剪消息内容
pub fn validate_content(content: &str) -> PlatformResult<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(PlatformError::validation("content", "消息内容不能为空"));
    }
    if trimmed.chars().count() > MAX_MESSAGE_CHARS {
        return Err(PlatformError::validation(
            "content",
            format!("消息内容不能超过 {} 个字符", MAX_MESSAGE_CHARS),
        ));
    }
    Ok(trimmed.to_string())
}

pub fn average_per_session(messages: u64, sessions: u64) -> f64 {
    if sessions == 0 {
        0.0
    } else {
        messages as f64 / sessions as f64
    }
}

/// 补齐窗口内没有消息的日期
pub fn fill_daily_counts(start: NaiveDate, days: i64, counts: &HashMap<NaiveDate, i64>) -> Vec<DailyCount> {
    (0..days)
        .filter_map(|offset| start.checked_add_signed(Duration::days(offset)))
        .map(|date| DailyCount {
            date,
            count: counts.get(&date).copied().unwrap_or(0),
        })
        .collect()
}

/// 聊天服务
pub struct ChatService {
    db: Arc<DatabaseConnection>,
    broker: Arc<dyn MessageBroker>,
    usage: Arc<UsageService>,
}

impl ChatService {
    pub fn new(db: Arc<DatabaseConnection>, broker: Arc<dyn MessageBroker>, usage: Arc<UsageService>) -> Self {
        Self { db, broker, usage }
    }

    #[instrument(skip(self, request))]
    pub async fn start_session(&self, tenant_id: Uuid, request: StartSessionRequest) -> PlatformResult<chat_session::Model> {
        let visitor_id = request.visitor_id.trim();
        if visitor_id.is_empty() {
            return Err(PlatformError::validation("visitor_id", "访客标识不能为空"));
        }

        let now = Utc::now();
        let session = chat_session::ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(tenant_id),
            visitor_id: Set(visitor_id.to_string()),
            channel: Set(request.channel.unwrap_or_else(|| "web".to_string())),
            status: Set(SessionStatus::Open),
            started_at: Set(now.into()),
            ended_at: Set(None),
            message_count: Set(0),
            metadata: Set(request.metadata.unwrap_or_else(|| json!({}))),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(self.db.as_ref())
        .await?;

        info!(tenant_id = %tenant_id, session_id = %session.id, "会话已开始");
        Ok(session)
    }

    pub async fn get_session(&self, tenant_id: Uuid, session_id: Uuid) -> PlatformResult<chat_session::Model> {
        ChatSession::find_by_id(session_id)
            .filter(chat_session::Column::TenantId.eq(tenant_id))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| PlatformError::not_found(format!("会话 {}", session_id)))
    }

    pub async fn list_sessions(&self, tenant_id: Uuid, query: &SessionQuery) -> PlatformResult<PaginatedResponse<chat_session::Model>> {
        let pagination = query.pagination();
        let mut select = ChatSession::find().filter(chat_session::Column::TenantId.eq(tenant_id));
        if let Some(status) = query.status {
            select = select.filter(chat_session::Column::Status.eq(status));
        }

        let paginator = select
            .order_by_desc(chat_session::Column::StartedAt)
            .paginate(self.db.as_ref(), pagination.page_size());
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(pagination.page_index()).await?;
        Ok(PaginatedResponse::new(items, total, pagination.page(), pagination.page_size()))
    }

    /// 关闭会话；已关闭的会话原样返回
    #[instrument(skip(self))]
    pub async fn close_session(&self, tenant_id: Uuid, session_id: Uuid) -> PlatformResult<chat_session::Model> {
        let session = self.get_session(tenant_id, session_id).await?;
        if session.status == SessionStatus::Closed {
            return Ok(session);
        }

        let now = Utc::now();
        let mut active: chat_session::ActiveModel = session.into();
        active.status = Set(SessionStatus::Closed);
        active.ended_at = Set(Some(now.into()));
        active.updated_at = Set(now.into());
        let session = active.update(self.db.as_ref()).await?;

        let event = EventEnvelope::new(
            routing::CHAT_SESSION_CLOSED,
            Some(tenant_id),
            json!({ "session_id": session.id, "message_count": session.message_count }),
        )
        .with_idempotency_key(format!("session-closed:{}", session.id));
        publish_event(self.broker.as_ref(), routing::CHAT_SESSION_CLOSED, &event).await?;

        info!(tenant_id = %tenant_id, session_id = %session_id, "会话已关闭");
        Ok(session)
    }

    async fn open_session(&self, tenant_id: Uuid, session_id: Uuid) -> PlatformResult<chat_session::Model> {
        let session = self.get_session(tenant_id, session_id).await?;
        if session.status != SessionStatus::Open {
            return Err(PlatformError::conflict("会话已关闭"));
        }
        Ok(session)
    }

    async fn bump_message_count(&self, session_id: Uuid) -> PlatformResult<()> {
        ChatSession::update_many()
            .col_expr(
                chat_session::Column::MessageCount,
                Expr::col(chat_session::Column::MessageCount).add(1),
            )
            .col_expr(chat_session::Column::UpdatedAt, Expr::value(DateTime::<FixedOffset>::from(Utc::now())))
            .filter(chat_session::Column::Id.eq(session_id))
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// 记录访客消息；需要可用订阅且消息额度未用完
    #[instrument(skip(self, request))]
    pub async fn post_user_message(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        request: PostMessageRequest,
    ) -> PlatformResult<chat_message::Model> {
        let content = validate_content(&request.content)?;
        self.open_session(tenant_id, session_id).await?;
        self.usage.ensure_can_consume(tenant_id, UsageMetric::Messages, 1).await?;

        let message = chat_message::ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(tenant_id),
            session_id: Set(session_id),
            role: Set(MessageRole::User),
            content: Set(content),
            confidence: Set(None),
            sources: Set(json!([])),
            created_at: Set(Utc::now().into()),
        }
        .insert(self.db.as_ref())
        .await?;
        self.bump_message_count(session_id).await?;

        let created = EventEnvelope::new(
            routing::CHAT_MESSAGE_CREATED,
            Some(tenant_id),
            json!({ "session_id": session_id, "message_id": message.id, "content": message.content }),
        );
        publish_event(self.broker.as_ref(), routing::CHAT_MESSAGE_CREATED, &created).await?;

        let usage = EventEnvelope::new(routing::USAGE_MESSAGE_ADDED, Some(tenant_id), json!({ "count": 1 }))
            .with_idempotency_key(format!("usage:message:{}", message.id));
        publish_event(self.broker.as_ref(), routing::USAGE_MESSAGE_ADDED, &usage).await?;

        info!(tenant_id = %tenant_id, session_id = %session_id, message_id = %message.id, "访客消息已记录");
        Ok(message)
    }

    /// 记录机器人回复并发布带原始问题的回答事件
    #[instrument(skip(self, request))]
    pub async fn record_assistant_reply(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        request: AssistantReplyRequest,
    ) -> PlatformResult<chat_message::Model> {
        let content = validate_content(&request.content)?;
        if let Some(confidence) = request.confidence {
            if !(0.0..=1.0).contains(&confidence) {
                return Err(PlatformError::validation("confidence", "置信度必须在 0 到 1 之间"));
            }
        }
        self.open_session(tenant_id, session_id).await?;

        let question = ChatMessage::find()
            .filter(chat_message::Column::SessionId.eq(session_id))
            .filter(chat_message::Column::Role.eq(MessageRole::User))
            .order_by_desc(chat_message::Column::CreatedAt)
            .one(self.db.as_ref())
            .await?;
        if question.is_none() {
            warn!(session_id = %session_id, "回复前没有访客消息");
        }

        let message = chat_message::ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(tenant_id),
            session_id: Set(session_id),
            role: Set(MessageRole::Assistant),
            content: Set(content),
            confidence: Set(request.confidence),
            sources: Set(serde_json::to_value(&request.sources)?),
            created_at: Set(Utc::now().into()),
        }
        .insert(self.db.as_ref())
        .await?;
        self.bump_message_count(session_id).await?;

        let event = EventEnvelope::new(
            routing::CHAT_ANSWER_GENERATED,
            Some(tenant_id),
            json!({
                "session_id": session_id,
                "message_id": message.id,
                "question": question.map(|q| q.content).unwrap_or_default(),
                "answer": message.content,
                "confidence": request.confidence,
                "sources": request.sources,
            }),
        );
        publish_event(self.broker.as_ref(), routing::CHAT_ANSWER_GENERATED, &event).await?;

        Ok(message)
    }

    pub async fn list_messages(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        pagination: &PaginationParams,
    ) -> PlatformResult<PaginatedResponse<chat_message::Model>> {
        self.get_session(tenant_id, session_id).await?;
        let paginator = ChatMessage::find()
            .filter(chat_message::Column::SessionId.eq(session_id))
            .order_by_asc(chat_message::Column::CreatedAt)
            .paginate(self.db.as_ref(), pagination.page_size());
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(pagination.page_index()).await?;
        Ok(PaginatedResponse::new(items, total, pagination.page(), pagination.page_size()))
    }

    /// 最近 `days` 天的会话与消息统计
    #[instrument(skip(self))]
    pub async fn analytics(&self, tenant_id: Uuid, days: i64) -> PlatformResult<ChatAnalytics> {
        let days = days.clamp(1, MAX_ANALYTICS_DAYS);
        let start = (Utc::now() - Duration::days(days - 1)).date_naive();
        let since = start.and_hms_opt(0, 0, 0).map(|t| t.and_utc()).unwrap_or_else(Utc::now);

        let sessions = ChatSession::find()
            .filter(chat_session::Column::TenantId.eq(tenant_id))
            .filter(chat_session::Column::StartedAt.gte(since))
            .count(self.db.as_ref())
            .await?;
        let messages = ChatMessage::find()
            .filter(chat_message::Column::TenantId.eq(tenant_id))
            .filter(chat_message::Column::CreatedAt.gte(since))
            .count(self.db.as_ref())
            .await?;

        let rows = DayRow::find_by_statement(Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            r#"SELECT (created_at AT TIME ZONE 'UTC')::date AS day, COUNT(*) AS count
               FROM chat_messages
               WHERE tenant_id = $1 AND created_at >= $2
               GROUP BY day
               ORDER BY day"#,
            [tenant_id.into(), since.into()],
        ))
        .all(self.db.as_ref())
        .await?;
        let counts: HashMap<NaiveDate, i64> = rows.into_iter().map(|row| (row.day, row.count)).collect();

        Ok(ChatAnalytics {
            tenant_id,
            days,
            sessions,
            messages,
            avg_messages_per_session: average_per_session(messages, sessions),
            messages_per_day: fill_daily_counts(start, days, &counts),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::messaging::InMemoryBroker;
    use crate::services::billing::SubscriptionService;
    use crate::services::fixtures;
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn service(db: Arc<DatabaseConnection>, broker: Arc<InMemoryBroker>) -> ChatService {
        let config = AppConfig::default();
        let subscriptions = SubscriptionService::new(db.clone(), broker.clone(), &config.billing);
        let usage = UsageService::new(db.clone(), subscriptions);
        ChatService::new(db, broker, Arc::new(usage))
    }

    #[test]
    fn test_validate_content() {
        assert_eq!(validate_content("  hello  ").unwrap(), "hello");
        assert!(validate_content("   ").is_err());
        assert!(validate_content(&"a".repeat(MAX_MESSAGE_CHARS + 1)).is_err());
        assert!(validate_content(&"中".repeat(MAX_MESSAGE_CHARS)).is_ok());
    }

    #[test]
    fn test_average_per_session() {
        assert_eq!(average_per_session(10, 4), 2.5);
        assert_eq!(average_per_session(10, 0), 0.0);
    }

    #[test]
    fn test_fill_daily_counts() {
        let start = NaiveDate::from_ymd_opt(2024, 2, 28).unwrap();
        let mut counts = HashMap::new();
        counts.insert(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(), 7);

        let filled = fill_daily_counts(start, 3, &counts);
        assert_eq!(
            filled.iter().map(|d| d.count).collect::<Vec<_>>(),
            vec![0, 7, 0]
        );
        assert_eq!(filled[2].date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
    }

    #[tokio::test]
    async fn test_close_session_publishes_event() {
        let tenant_id = Uuid::new_v4();
        let open = fixtures::chat_session(tenant_id, SessionStatus::Open);
        let mut closed = open.clone();
        closed.status = SessionStatus::Closed;
        closed.message_count = 4;

        let db = fixtures::connect(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([vec![open.clone()]])
                .append_query_results([vec![closed]]),
        );
        let broker = Arc::new(InMemoryBroker::new());

        let session = service(db, broker.clone()).close_session(tenant_id, open.id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Closed);

        let events = broker.messages_for(routing::CHAT_SESSION_CLOSED);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.payload["message_count"], json!(4));
    }

    #[tokio::test]
    async fn test_closing_twice_does_not_republish() {
        let tenant_id = Uuid::new_v4();
        let closed = fixtures::chat_session(tenant_id, SessionStatus::Closed);

        let db = fixtures::connect(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([vec![closed.clone()]]),
        );
        let broker = Arc::new(InMemoryBroker::new());

        service(db, broker.clone()).close_session(tenant_id, closed.id).await.unwrap();
        assert!(broker.messages().is_empty());
    }

    #[tokio::test]
    async fn test_message_to_closed_session_conflicts() {
        let tenant_id = Uuid::new_v4();
        let closed = fixtures::chat_session(tenant_id, SessionStatus::Closed);

        let db = fixtures::connect(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([vec![closed.clone()]]),
        );

        let err = service(db, Arc::new(InMemoryBroker::new()))
            .post_user_message(tenant_id, closed.id, PostMessageRequest { content: "hi".into() })
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 409);
    }

    #[tokio::test]
    async fn test_reply_confidence_must_be_a_probability() {
        let db = fixtures::connect(MockDatabase::new(DatabaseBackend::Postgres));
        let err = service(db, Arc::new(InMemoryBroker::new()))
            .record_assistant_reply(
                Uuid::new_v4(),
                Uuid::new_v4(),
                AssistantReplyRequest { content: "answer".into(), confidence: Some(1.5), sources: vec![] },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::Validation { .. }));
    }
}
