// 实体预导入模块

pub use super::chat_message::{Entity as ChatMessage, Model as ChatMessageModel};
pub use super::chat_session::{Entity as ChatSession, Model as ChatSessionModel};
pub use super::document::{Entity as Document, Model as DocumentModel};
pub use super::ingestion_job::{Entity as IngestionJob, Model as IngestionJobModel};
pub use super::invoice::{Entity as Invoice, Model as InvoiceModel};
pub use super::knowledge_gap::{Entity as KnowledgeGap, Model as KnowledgeGapModel};
pub use super::notification_log::{Entity as NotificationLog, Model as NotificationLogModel};
pub use super::payment::{Entity as Payment, Model as PaymentModel};
pub use super::plan::{Entity as Plan, Model as PlanModel};
pub use super::processed_event::{Entity as ProcessedEvent, Model as ProcessedEventModel};
pub use super::quality_metric::{Entity as QualityMetric, Model as QualityMetricModel};
pub use super::subscription::{Entity as Subscription, Model as SubscriptionModel};
pub use super::tenant::{Entity as Tenant, Model as TenantModel};
pub use super::workflow_execution::{Entity as WorkflowExecution, Model as WorkflowExecutionModel};
