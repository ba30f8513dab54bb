// 数据库实体模块
// 包含所有 SeaORM 实体定义

pub mod tenant;
pub mod document;
pub mod ingestion_job;

// 计费
pub mod plan;
pub mod subscription;
pub mod payment;
pub mod invoice;

// 聊天与质量
pub mod chat_session;
pub mod chat_message;
pub mod quality_metric;
pub mod knowledge_gap;

pub mod workflow_execution;
pub mod notification_log;
pub mod processed_event;

pub mod prelude;
pub use prelude::*;
