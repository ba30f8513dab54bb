// 回答质量服务
// 低置信度回答标记、知识缺口聚合、用户反馈与质量报表

use crate::config::QualityConfig;
use crate::db::entities::{
    knowledge_gap::{self, GapStatus},
    prelude::*,
    quality_metric,
};
use crate::errors::{PlatformError, PlatformResult};
use crate::messaging::topics::{routing, CHAT_EXCHANGE};
use crate::messaging::{Binding, EventHandler};
use async_trait::async_trait;
use chatwise_common::{EventEnvelope, PaginatedResponse, PaginationParams};
use chrono::{DateTime, Duration, FixedOffset, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

/// 问题归一化：小写、去标点、合并空白
pub fn normalize_question(question: &str) -> String {
    question
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// 问题与回答的词重合度（0.0 - 1.0）
pub fn relevance_score(question: &str, answer: &str) -> Option<f64> {
    let question_words: HashSet<String> = normalize_question(question)
        .split(' ')
        .filter(|w| w.chars().count() > 2)
        .map(str::to_string)
        .collect();
    if question_words.is_empty() {
        return None;
    }
    let answer_words: HashSet<String> = normalize_question(answer).split(' ').map(str::to_string).collect();
    let hits = question_words.iter().filter(|w| answer_words.contains(*w)).count();
    Some(hits as f64 / question_words.len() as f64)
}

/// 追加一个样本后的平均值
pub fn running_average(average: f64, count: i32, value: f64) -> f64 {
    let count = count.max(0) as f64;
    (average * count + value) / (count + 1.0)
}

/// `chat.answer.generated` 负载
#[derive(Debug, Clone, Deserialize)]
pub struct AnswerGenerated {
    pub session_id: Uuid,
    pub message_id: Uuid,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// 反馈请求
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct FeedbackRequest {
    pub helpful: Option<bool>,
    /// 1 - 5
    pub rating: Option<i32>,
}

impl FeedbackRequest {
    pub fn validate(&self) -> PlatformResult<()> {
        if self.helpful.is_none() && self.rating.is_none() {
            return Err(PlatformError::validation("feedback", "至少需要提供 helpful 或 rating"));
        }
        if let Some(rating) = self.rating {
            if !(1..=5).contains(&rating) {
                return Err(PlatformError::validation("rating", "评分必须在 1 到 5 之间"));
            }
        }
        Ok(())
    }
}

/// 缺口查询参数
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct GapQuery {
    pub status: Option<GapStatus>,
    pub min_occurrences: Option<i32>,
    pub page: Option<u64>,
    pub page_size: Option<u64>,
}

/// 缺口处理请求
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct GapResolutionRequest {
    pub note: Option<String>,
}

/// 知识缺口视图
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GapView {
    pub id: Uuid,
    pub question: String,
    pub normalized_question: String,
    pub occurrences: i32,
    pub avg_confidence: f64,
    pub status: GapStatus,
    pub resolution_note: Option<String>,
    pub last_seen_at: DateTime<FixedOffset>,
}

impl From<knowledge_gap::Model> for GapView {
    fn from(model: knowledge_gap::Model) -> Self {
        Self {
            id: model.id,
            question: model.sample_question,
            normalized_question: model.normalized_question,
            occurrences: model.occurrences,
            avg_confidence: model.avg_confidence,
            status: model.status,
            resolution_note: model.resolution_note,
            last_seen_at: model.last_seen_at,
        }
    }
}

/// 质量报表
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct QualityReport {
    pub answers: u64,
    pub avg_confidence: f64,
    pub flagged: u64,
    pub flagged_ratio: f64,
    pub feedback_count: u64,
    pub helpful_ratio: f64,
    pub avg_rating: Option<f64>,
    pub open_gaps: u64,
}

/// 汇总质量指标
pub fn summarize_metrics(metrics: &[quality_metric::Model]) -> QualityReport {
    let answers = metrics.len() as u64;
    if answers == 0 {
        return QualityReport::default();
    }

    let flagged = metrics.iter().filter(|m| m.flagged).count() as u64;
    let confidence_sum: f64 = metrics.iter().map(|m| m.confidence).sum();
    let helpful_votes: Vec<bool> = metrics.iter().filter_map(|m| m.helpful).collect();
    let ratings: Vec<i32> = metrics.iter().filter_map(|m| m.rating).collect();
    let helpful = helpful_votes.iter().filter(|h| **h).count();

    QualityReport {
        answers,
        avg_confidence: confidence_sum / answers as f64,
        flagged,
        flagged_ratio: flagged as f64 / answers as f64,
        feedback_count: helpful_votes.len() as u64,
        helpful_ratio: if helpful_votes.is_empty() {
            0.0
        } else {
            helpful as f64 / helpful_votes.len() as f64
        },
        avg_rating: (!ratings.is_empty())
            .then(|| ratings.iter().map(|r| *r as f64).sum::<f64>() / ratings.len() as f64),
        open_gaps: 0,
    }
}

/// 按归一化问题累计出现次数并维护平均置信度；已解决的缺口重新打开
async fn upsert_gap<C: ConnectionTrait>(
    db: &C,
    tenant_id: Uuid,
    normalized: &str,
    sample: &str,
    confidence: f64,
) -> PlatformResult<()> {
    db.execute(Statement::from_sql_and_values(
        DatabaseBackend::Postgres,
        r#"INSERT INTO knowledge_gaps
               (id, tenant_id, normalized_question, sample_question, occurrences, avg_confidence,
                status, first_seen_at, last_seen_at, created_at, updated_at)
           VALUES ($1, $2, $3, $4, 1, $5, 'open', NOW(), NOW(), NOW(), NOW())
           ON CONFLICT (tenant_id, normalized_question) DO UPDATE SET
               avg_confidence = (knowledge_gaps.avg_confidence * knowledge_gaps.occurrences + EXCLUDED.avg_confidence)
                                / (knowledge_gaps.occurrences + 1),
               occurrences = knowledge_gaps.occurrences + 1,
               sample_question = EXCLUDED.sample_question,
               last_seen_at = NOW(),
               updated_at = NOW(),
               status = CASE WHEN knowledge_gaps.status = 'resolved' THEN 'open' ELSE knowledge_gaps.status END,
               resolved_at = CASE WHEN knowledge_gaps.status = 'resolved' THEN NULL ELSE knowledge_gaps.resolved_at END"#,
        [
            Uuid::new_v4().into(),
            tenant_id.into(),
            normalized.into(),
            sample.into(),
            confidence.into(),
        ],
    ))
    .await?;
    Ok(())
}

/// 回答质量服务
pub struct QualityService {
    db: Arc<DatabaseConnection>,
    config: QualityConfig,
}

impl QualityService {
    pub fn new(db: Arc<DatabaseConnection>, config: QualityConfig) -> Self {
        Self { db, config }
    }

    pub fn is_low_confidence(&self, confidence: f64) -> bool {
        confidence < self.config.low_confidence_threshold
    }

    /// 记录一次回答；低置信度时聚合到知识缺口
    ///
    /// 质量记录与缺口聚合在同一事务内写入。同一消息重复投递时返回已有记录，
    /// 缺口计数不会重复累加。
    #[instrument(skip(self, answer), fields(message_id = %answer.message_id))]
    pub async fn record_answer(&self, tenant_id: Uuid, answer: &AnswerGenerated) -> PlatformResult<quality_metric::Model> {
        let confidence = answer.confidence.unwrap_or(0.0).clamp(0.0, 1.0);
        let flagged = self.is_low_confidence(confidence);
        let now = Utc::now();

        let metric = quality_metric::Model {
            id: Uuid::new_v4(),
            tenant_id,
            session_id: answer.session_id,
            message_id: answer.message_id,
            question: answer.question.clone(),
            confidence,
            relevance: relevance_score(&answer.question, &answer.answer),
            helpful: None,
            rating: None,
            flagged,
            created_at: now.into(),
            updated_at: now.into(),
        };

        let txn = self.db.begin().await?;
        let inserted = QualityMetric::insert(metric.clone().into_active_model())
            .on_conflict(OnConflict::column(quality_metric::Column::MessageId).do_nothing().to_owned())
            .exec_without_returning(&txn)
            .await?;
        if inserted == 0 {
            txn.rollback().await?;
            debug!("该回答已记录，跳过");
            return self.find_metric(tenant_id, answer.message_id).await;
        }

        if flagged {
            let normalized = normalize_question(&answer.question);
            if normalized.is_empty() {
                debug!("低置信度回答没有原始问题，跳过缺口聚合");
            } else {
                upsert_gap(&txn, tenant_id, &normalized, answer.question.trim(), confidence).await?;
            }
        }
        txn.commit().await?;

        info!(tenant_id = %tenant_id, confidence, flagged, "回答质量已记录");
        Ok(metric)
    }

    async fn find_metric(&self, tenant_id: Uuid, message_id: Uuid) -> PlatformResult<quality_metric::Model> {
        QualityMetric::find()
            .filter(quality_metric::Column::TenantId.eq(tenant_id))
            .filter(quality_metric::Column::MessageId.eq(message_id))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| PlatformError::not_found(format!("消息 {} 的质量记录", message_id)))
    }

    /// 对某条回答提交反馈
    #[instrument(skip(self, request))]
    pub async fn submit_feedback(
        &self,
        tenant_id: Uuid,
        message_id: Uuid,
        request: FeedbackRequest,
    ) -> PlatformResult<quality_metric::Model> {
        request.validate()?;

        let metric = self.find_metric(tenant_id, message_id).await?;

        let mut active: quality_metric::ActiveModel = metric.into();
        if let Some(helpful) = request.helpful {
            active.helpful = Set(Some(helpful));
        }
        if let Some(rating) = request.rating {
            active.rating = Set(Some(rating));
        }
        active.updated_at = Set(Utc::now().into());

        let metric = active.update(self.db.as_ref()).await?;
        info!(tenant_id = %tenant_id, message_id = %message_id, "反馈已记录");
        Ok(metric)
    }

    /// 列出缺口：未处理的在前，按出现次数降序
    pub async fn list_gaps(&self, tenant_id: Uuid, query: &GapQuery) -> PlatformResult<PaginatedResponse<knowledge_gap::Model>> {
        let pagination = PaginationParams {
            page: query.page,
            page_size: query.page_size,
        };
        let min_occurrences = query.min_occurrences.unwrap_or(self.config.gap_min_occurrences);

        let mut select = KnowledgeGap::find()
            .filter(knowledge_gap::Column::TenantId.eq(tenant_id))
            .filter(knowledge_gap::Column::Occurrences.gte(min_occurrences));
        if let Some(status) = query.status {
            select = select.filter(knowledge_gap::Column::Status.eq(status));
        }

        let paginator = select
            .order_by(Expr::cust("CASE WHEN status = 'open' THEN 0 ELSE 1 END"), Order::Asc)
            .order_by_desc(knowledge_gap::Column::Occurrences)
            .order_by_desc(knowledge_gap::Column::LastSeenAt)
            .paginate(self.db.as_ref(), pagination.page_size());
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(pagination.page_index()).await?;
        Ok(PaginatedResponse::new(items, total, pagination.page(), pagination.page_size()))
    }

    async fn get_gap(&self, tenant_id: Uuid, gap_id: Uuid) -> PlatformResult<knowledge_gap::Model> {
        KnowledgeGap::find_by_id(gap_id)
            .filter(knowledge_gap::Column::TenantId.eq(tenant_id))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| PlatformError::not_found(format!("知识缺口 {}", gap_id)))
    }

    async fn close_gap(
        &self,
        tenant_id: Uuid,
        gap_id: Uuid,
        status: GapStatus,
        note: Option<String>,
    ) -> PlatformResult<knowledge_gap::Model> {
        let gap = self.get_gap(tenant_id, gap_id).await?;
        if gap.status != GapStatus::Open {
            return Err(PlatformError::conflict(format!("知识缺口已处于 {:?} 状态", gap.status)));
        }

        let now = Utc::now();
        let mut active: knowledge_gap::ActiveModel = gap.into();
        active.status = Set(status);
        active.resolution_note = Set(note);
        active.resolved_at = Set(Some(now.into()));
        active.updated_at = Set(now.into());

        let gap = active.update(self.db.as_ref()).await?;
        info!(tenant_id = %tenant_id, gap_id = %gap_id, status = ?status, "知识缺口已处理");
        Ok(gap)
    }

    pub async fn resolve_gap(&self, tenant_id: Uuid, gap_id: Uuid, note: Option<String>) -> PlatformResult<knowledge_gap::Model> {
        self.close_gap(tenant_id, gap_id, GapStatus::Resolved, note).await
    }

    pub async fn dismiss_gap(&self, tenant_id: Uuid, gap_id: Uuid, note: Option<String>) -> PlatformResult<knowledge_gap::Model> {
        self.close_gap(tenant_id, gap_id, GapStatus::Dismissed, note).await
    }

    /// 最近 `days` 天的质量报表
    pub async fn report(&self, tenant_id: Uuid, days: i64) -> PlatformResult<QualityReport> {
        let since = Utc::now() - Duration::days(days.clamp(1, 365));
        let metrics = QualityMetric::find()
            .filter(quality_metric::Column::TenantId.eq(tenant_id))
            .filter(quality_metric::Column::CreatedAt.gte(since))
            .all(self.db.as_ref())
            .await?;

        let open_gaps = KnowledgeGap::find()
            .filter(knowledge_gap::Column::TenantId.eq(tenant_id))
            .filter(knowledge_gap::Column::Status.eq(GapStatus::Open))
            .count(self.db.as_ref())
            .await?;

        Ok(QualityReport {
            open_gaps,
            ..summarize_metrics(&metrics)
        })
    }
}

/// 消费 `chat.answer.generated`
pub struct AnswerGeneratedHandler {
    quality: Arc<QualityService>,
}

impl AnswerGeneratedHandler {
    pub fn new(quality: Arc<QualityService>) -> Self {
        Self { quality }
    }
}

#[async_trait]
impl EventHandler for AnswerGeneratedHandler {
    fn name(&self) -> &'static str {
        "quality.answer_generated"
    }

    fn bindings(&self) -> Vec<Binding> {
        vec![Binding::new(CHAT_EXCHANGE, routing::CHAT_ANSWER_GENERATED)]
    }

    async fn handle(&self, event: &EventEnvelope) -> PlatformResult<()> {
        let tenant_id = event
            .tenant_id
            .ok_or_else(|| PlatformError::validation("tenant_id", "回答事件缺少租户"))?;
        let answer: AnswerGenerated = event.payload_as()?;
        self.quality.record_answer(tenant_id, &answer).await?;
        Ok(())
    }
}
