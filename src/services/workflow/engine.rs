// 工作流执行引擎
// 按顺序执行步骤并持久化进度，失败的执行可在尝试上限内重试

use super::definitions::{WorkflowDefinition, WorkflowRegistry, WorkflowStep};
use super::webhook::{ensure_public_host, tenant_webhook_url};
use crate::db::entities::{
    prelude::*,
    workflow_execution::{self, ExecutionStatus},
};
use crate::db::repositories::{ProcessedEventRepository, TenantRepository};
use crate::errors::{PlatformError, PlatformResult};
use crate::messaging::topics::{exchange_for, EMAIL_SEND_QUEUE};
use crate::messaging::{publish_event, Binding, EventHandler, MessageBroker};
use crate::services::communications::SendEmailRequest;
use async_trait::async_trait;
use chatwise_common::{EventEnvelope, PaginatedResponse, PaginationParams};
use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct StartWorkflowRequest {
    pub workflow_key: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub input: Value,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct ExecutionQuery {
    pub status: Option<ExecutionStatus>,
    pub workflow_key: Option<String>,
    pub page: Option<u64>,
    pub page_size: Option<u64>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ExecutionView {
    pub id: Uuid,
    pub workflow_key: String,
    pub trigger_event: Option<String>,
    pub status: ExecutionStatus,
    #[schema(value_type = Object)]
    pub input: Value,
    #[schema(value_type = Object)]
    pub output: Value,
    pub current_step: i32,
    pub total_steps: i32,
    pub attempt: i32,
    pub max_attempts: i32,
    pub error: Option<String>,
    pub started_at: Option<DateTime<FixedOffset>>,
    pub completed_at: Option<DateTime<FixedOffset>>,
    pub created_at: DateTime<FixedOffset>,
}

impl From<workflow_execution::Model> for ExecutionView {
    fn from(model: workflow_execution::Model) -> Self {
        Self {
            id: model.id,
            workflow_key: model.workflow_key,
            trigger_event: model.trigger_event,
            status: model.status,
            input: model.input,
            output: model.output,
            current_step: model.current_step,
            total_steps: model.total_steps,
            attempt: model.attempt,
            max_attempts: model.max_attempts,
            error: model.error,
            started_at: model.started_at,
            completed_at: model.completed_at,
            created_at: model.created_at,
        }
    }
}

fn ensure_transition(from: ExecutionStatus, to: ExecutionStatus) -> PlatformResult<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(PlatformError::conflict(format!("工作流执行不能从 {:?} 变为 {:?}", from, to)))
    }
}

fn input_str<'a>(input: &'a Value, field: &str) -> Option<&'a str> {
    input.get(field).and_then(Value::as_str).filter(|s| !s.is_empty())
}

pub struct WorkflowService {
    db: Arc<DatabaseConnection>,
    broker: Arc<dyn MessageBroker>,
    registry: WorkflowRegistry,
    http: reqwest::Client,
}

impl WorkflowService {
    pub fn new(db: Arc<DatabaseConnection>, broker: Arc<dyn MessageBroker>, registry: WorkflowRegistry) -> PlatformResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| PlatformError::configuration(format!("创建 HTTP 客户端失败: {}", e)))?;
        Ok(Self {
            db,
            broker,
            registry,
            http,
        })
    }

    pub fn registry(&self) -> &WorkflowRegistry {
        &self.registry
    }

    fn definition(&self, key: &str) -> PlatformResult<&WorkflowDefinition> {
        self.registry
            .get(key)
            .ok_or_else(|| PlatformError::not_found(format!("工作流 {}", key)))
    }

    /// 创建执行并立即运行
    #[instrument(skip(self, input))]
    pub async fn start(
        &self,
        tenant_id: Uuid,
        workflow_key: &str,
        input: Value,
        trigger_event: Option<String>,
    ) -> PlatformResult<workflow_execution::Model> {
        let definition = self.definition(workflow_key)?;
        let input = match input {
            Value::Null => json!({}),
            Value::Object(_) => input,
            _ => return Err(PlatformError::validation("input", "工作流输入必须是 JSON 对象")),
        };

        let now = Utc::now();
        let execution = workflow_execution::ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(tenant_id),
            workflow_key: Set(definition.key.clone()),
            trigger_event: Set(trigger_event),
            status: Set(ExecutionStatus::Pending),
            input: Set(input),
            output: Set(json!({})),
            current_step: Set(0),
            total_steps: Set(definition.steps.len() as i32),
            attempt: Set(1),
            max_attempts: Set(definition.max_attempts),
            error: Set(None),
            started_at: Set(None),
            completed_at: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(self.db.as_ref())
        .await?;

        info!(tenant_id = %tenant_id, execution_id = %execution.id, workflow = workflow_key, "工作流执行已创建");
        self.run(definition, execution).await
    }

    /// 从 `current_step` 开始执行剩余步骤
    ///
    /// 每次写入都以执行仍处于预期状态为条件；中途被取消时停在当前步骤。
    async fn run(
        &self,
        definition: &WorkflowDefinition,
        mut execution: workflow_execution::Model,
    ) -> PlatformResult<workflow_execution::Model> {
        ensure_transition(execution.status, ExecutionStatus::Running)?;
        let start_at = execution.current_step.max(0) as usize;
        let mut output = execution.output.clone();
        if !output.is_object() {
            output = json!({});
        }

        let now: DateTime<FixedOffset> = Utc::now().into();
        let started = self
            .update_if(execution.id, execution.status)
            .col_expr(workflow_execution::Column::Status, Expr::value(ExecutionStatus::Running))
            .col_expr(workflow_execution::Column::StartedAt, Expr::value(Some(now)))
            .col_expr(workflow_execution::Column::Error, Expr::value(Option::<String>::None))
            .col_expr(workflow_execution::Column::UpdatedAt, Expr::value(now))
            .exec(self.db.as_ref())
            .await?;
        if started.rows_affected == 0 {
            return self.superseded(execution.id).await;
        }
        execution.status = ExecutionStatus::Running;
        execution.started_at = Some(now);
        execution.error = None;
        execution.updated_at = now;

        for (index, step) in definition.steps.iter().enumerate().skip(start_at) {
            match self.execute_step(&execution, index, step).await {
                Ok(result) => {
                    if let Some(map) = output.as_object_mut() {
                        map.insert(format!("{}:{}", index, step.kind()), result);
                    }
                    let now: DateTime<FixedOffset> = Utc::now().into();
                    let progressed = self
                        .update_if(execution.id, ExecutionStatus::Running)
                        .col_expr(workflow_execution::Column::CurrentStep, Expr::value(index as i32 + 1))
                        .col_expr(workflow_execution::Column::Output, Expr::value(output.clone()))
                        .col_expr(workflow_execution::Column::UpdatedAt, Expr::value(now))
                        .exec(self.db.as_ref())
                        .await?;
                    if progressed.rows_affected == 0 {
                        info!(execution_id = %execution.id, step = index, "执行已不在运行状态，停止后续步骤");
                        return self.superseded(execution.id).await;
                    }
                    execution.current_step = index as i32 + 1;
                    execution.output = output.clone();
                    execution.updated_at = now;
                }
                Err(e) => {
                    warn!(execution_id = %execution.id, step = index, kind = step.kind(), error = %e, "工作流步骤失败");
                    return self.finish(execution, ExecutionStatus::Failed, Some(e.to_string())).await;
                }
            }
        }

        self.finish(execution, ExecutionStatus::Completed, None).await
    }

    /// 仅当执行仍处于 `expected` 状态时生效的更新
    fn update_if(&self, execution_id: Uuid, expected: ExecutionStatus) -> UpdateMany<WorkflowExecution> {
        WorkflowExecution::update_many()
            .filter(workflow_execution::Column::Id.eq(execution_id))
            .filter(workflow_execution::Column::Status.eq(expected))
    }

    /// 条件更新落空时读取最新状态
    async fn superseded(&self, execution_id: Uuid) -> PlatformResult<workflow_execution::Model> {
        WorkflowExecution::find_by_id(execution_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| PlatformError::not_found(format!("工作流执行 {}", execution_id)))
    }

    async fn finish(
        &self,
        mut execution: workflow_execution::Model,
        status: ExecutionStatus,
        error: Option<String>,
    ) -> PlatformResult<workflow_execution::Model> {
        let now: DateTime<FixedOffset> = Utc::now().into();
        let finished = self
            .update_if(execution.id, execution.status)
            .col_expr(workflow_execution::Column::Status, Expr::value(status))
            .col_expr(workflow_execution::Column::Error, Expr::value(error.clone()))
            .col_expr(workflow_execution::Column::CompletedAt, Expr::value(Some(now)))
            .col_expr(workflow_execution::Column::UpdatedAt, Expr::value(now))
            .exec(self.db.as_ref())
            .await?;
        if finished.rows_affected == 0 {
            info!(execution_id = %execution.id, status = ?status, "执行状态已被其他操作修改");
            return self.superseded(execution.id).await;
        }

        execution.status = status;
        execution.error = error;
        execution.completed_at = Some(now);
        execution.updated_at = now;
        info!(execution_id = %execution.id, status = ?status, "工作流执行结束");
        Ok(execution)
    }

    async fn execute_step(&self, execution: &workflow_execution::Model, index: usize, step: &WorkflowStep) -> PlatformResult<Value> {
        let step_key = format!("workflow:{}:{}", execution.id, index);
        match step {
            WorkflowStep::PublishEvent { routing_key } => {
                let event = EventEnvelope::new(
                    routing_key.clone(),
                    Some(execution.tenant_id),
                    json!({
                        "execution_id": execution.id,
                        "workflow_key": execution.workflow_key,
                        "input": execution.input,
                    }),
                )
                .with_idempotency_key(step_key);
                publish_event(self.broker.as_ref(), routing_key, &event).await?;
                Ok(json!({ "published": routing_key }))
            }
            WorkflowStep::SendEmail {
                template,
                recipient_field,
                variables,
            } => {
                let recipient = input_str(&execution.input, recipient_field)
                    .ok_or_else(|| PlatformError::validation(recipient_field.as_str(), "输入缺少收件人"))?;
                let mut mapped = serde_json::Map::new();
                for (variable, field) in variables {
                    if let Some(value) = execution.input.get(field) {
                        mapped.insert(variable.clone(), value.clone());
                    }
                }

                let request = SendEmailRequest::new(Some(execution.tenant_id), *template, recipient, Value::Object(mapped))
                    .with_idempotency_key(step_key.clone());
                let event = EventEnvelope::new(EMAIL_SEND_QUEUE, Some(execution.tenant_id), serde_json::to_value(&request)?)
                    .with_idempotency_key(step_key);
                self.broker.send_to_queue(EMAIL_SEND_QUEUE, &event).await?;
                Ok(json!({ "queued_email": template.as_str(), "to": recipient }))
            }
            WorkflowStep::Webhook { optional } => {
                let tenant = TenantRepository::get(self.db.as_ref(), execution.tenant_id).await?;
                let Some(url) = tenant_webhook_url(&tenant.settings)? else {
                    if *optional {
                        return Ok(json!({ "skipped": true }));
                    }
                    return Err(PlatformError::validation("webhook_url", "租户未配置 webhook 地址"));
                };
                ensure_public_host(&url).await?;

                let response = self
                    .http
                    .post(url)
                    .json(&json!({
                        "execution_id": execution.id,
                        "tenant_id": execution.tenant_id,
                        "workflow_key": execution.workflow_key,
                        "input": execution.input,
                    }))
                    .send()
                    .await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(PlatformError::external_service("webhook", format!("返回 {}", status)));
                }
                Ok(json!({ "status": status.as_u16() }))
            }
        }
    }

    pub async fn get(&self, tenant_id: Uuid, execution_id: Uuid) -> PlatformResult<workflow_execution::Model> {
        WorkflowExecution::find_by_id(execution_id)
            .filter(workflow_execution::Column::TenantId.eq(tenant_id))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| PlatformError::not_found(format!("工作流执行 {}", execution_id)))
    }

    pub async fn list(
        &self,
        tenant_id: Uuid,
        query: &ExecutionQuery,
    ) -> PlatformResult<PaginatedResponse<workflow_execution::Model>> {
        let pagination = PaginationParams {
            page: query.page,
            page_size: query.page_size,
        };
        let mut select = WorkflowExecution::find().filter(workflow_execution::Column::TenantId.eq(tenant_id));
        if let Some(status) = query.status {
            select = select.filter(workflow_execution::Column::Status.eq(status));
        }
        if let Some(key) = &query.workflow_key {
            select = select.filter(workflow_execution::Column::WorkflowKey.eq(key.as_str()));
        }

        let paginator = select
            .order_by_desc(workflow_execution::Column::CreatedAt)
            .paginate(self.db.as_ref(), pagination.page_size());
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(pagination.page_index()).await?;
        Ok(PaginatedResponse::new(items, total, pagination.page(), pagination.page_size()))
    }

    #[instrument(skip(self))]
    pub async fn cancel(&self, tenant_id: Uuid, execution_id: Uuid) -> PlatformResult<workflow_execution::Model> {
        let execution = self.get(tenant_id, execution_id).await?;
        ensure_transition(execution.status, ExecutionStatus::Cancelled)?;
        let cancelled = self.finish(execution, ExecutionStatus::Cancelled, None).await?;
        if cancelled.status != ExecutionStatus::Cancelled {
            return Err(PlatformError::conflict(format!("工作流执行已变为 {:?}", cancelled.status)));
        }
        Ok(cancelled)
    }

    /// 重试失败的执行，从失败的步骤继续
    #[instrument(skip(self))]
    pub async fn retry(&self, tenant_id: Uuid, execution_id: Uuid) -> PlatformResult<workflow_execution::Model> {
        let execution = self.get(tenant_id, execution_id).await?;
        if execution.status != ExecutionStatus::Failed {
            return Err(PlatformError::conflict("只有失败的工作流执行可以重试"));
        }
        if execution.attempt >= execution.max_attempts {
            return Err(PlatformError::conflict(format!(
                "工作流执行已达到最大尝试次数 {}",
                execution.max_attempts
            )));
        }
        let definition = self.definition(&execution.workflow_key)?;

        let attempt = execution.attempt + 1;
        let now: DateTime<FixedOffset> = Utc::now().into();
        let reset = self
            .update_if(execution.id, ExecutionStatus::Failed)
            .col_expr(workflow_execution::Column::Status, Expr::value(ExecutionStatus::Pending))
            .col_expr(workflow_execution::Column::Attempt, Expr::value(attempt))
            .col_expr(workflow_execution::Column::CompletedAt, Expr::value(Option::<DateTime<FixedOffset>>::None))
            .col_expr(workflow_execution::Column::UpdatedAt, Expr::value(now))
            .exec(self.db.as_ref())
            .await?;
        if reset.rows_affected == 0 {
            return Err(PlatformError::conflict("工作流执行正在被其他请求重试"));
        }
        let execution = workflow_execution::Model {
            status: ExecutionStatus::Pending,
            attempt,
            completed_at: None,
            updated_at: now,
            ..execution
        };

        info!(tenant_id = %tenant_id, execution_id = %execution_id, attempt, "工作流执行重试");
        self.run(definition, execution).await
    }
}

/// 同一事件与工作流组合的触发记录键
pub fn trigger_key(event: &EventEnvelope, workflow_key: &str) -> String {
    format!("workflow-trigger:{}:{}", event.dedup_key(), workflow_key)
}

/// 按事件触发工作流；同一事件重投时已启动的工作流不再重复创建
pub struct WorkflowTriggerHandler {
    db: Arc<DatabaseConnection>,
    workflows: Arc<WorkflowService>,
}

impl WorkflowTriggerHandler {
    pub fn new(db: Arc<DatabaseConnection>, workflows: Arc<WorkflowService>) -> Self {
        Self { db, workflows }
    }
}

#[async_trait]
impl EventHandler for WorkflowTriggerHandler {
    fn name(&self) -> &'static str {
        "workflow.trigger"
    }

    fn bindings(&self) -> Vec<Binding> {
        self.workflows
            .registry()
            .triggers()
            .iter()
            .filter_map(|trigger| exchange_for(trigger).map(|exchange| Binding::new(exchange, trigger)))
            .collect()
    }

    async fn handle(&self, event: &EventEnvelope) -> PlatformResult<()> {
        let definitions = self.workflows.registry().triggered_by(&event.event_type);
        if definitions.is_empty() {
            return Ok(());
        }
        let tenant_id = event
            .tenant_id
            .ok_or_else(|| PlatformError::validation("tenant_id", "触发事件缺少租户"))?;
        let input = match &event.payload {
            Value::Object(map) => Value::Object(map.clone()),
            _ => json!({}),
        };

        for definition in definitions {
            let key = trigger_key(event, &definition.key);
            if !ProcessedEventRepository::try_insert(self.db.as_ref(), &key, self.name()).await? {
                info!(workflow = %definition.key, event_id = %event.event_id, "该事件已触发过此工作流，跳过");
                continue;
            }

            let started = self
                .workflows
                .start(tenant_id, &definition.key, input.clone(), Some(event.event_type.clone()))
                .await;
            match started {
                Ok(execution) if execution.status == ExecutionStatus::Failed => {
                    error!(execution_id = %execution.id, workflow = %definition.key, "触发的工作流执行失败，等待手动重试");
                }
                Ok(_) => {}
                Err(e) => {
                    ProcessedEventRepository::delete(self.db.as_ref(), &key).await?;
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}
