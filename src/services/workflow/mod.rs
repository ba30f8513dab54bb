// 工作流服务模块

pub mod definitions;
pub mod engine;
pub mod webhook;


pub use definitions::{WorkflowDefinition, WorkflowRegistry, WorkflowStep};
pub use engine::{ExecutionQuery, ExecutionView, StartWorkflowRequest, WorkflowService, WorkflowTriggerHandler};
pub use webhook::{tenant_webhook_url, validate_webhook_url};
