// 内置工作流定义

use crate::messaging::topics::routing;
use crate::services::communications::EmailTemplate;
use serde::Serialize;
use std::collections::BTreeMap;
use utoipa::ToSchema;

/// 工作流步骤
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowStep {
    /// 发布事件到主题交换机
    PublishEvent { routing_key: String },
    /// 投递到 `email.send` 队列
    SendEmail {
        template: EmailTemplate,
        /// 输入中收件人邮箱的字段名
        recipient_field: String,
        /// 模板变量 → 输入字段
        variables: BTreeMap<String, String>,
    },
    /// 向租户设置中的 `webhook_url` POST 执行上下文
    Webhook {
        /// 租户未配置地址时跳过而不是失败
        optional: bool,
    },
}

impl WorkflowStep {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PublishEvent { .. } => "publish_event",
            Self::SendEmail { .. } => "send_email",
            Self::Webhook { .. } => "webhook",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct WorkflowDefinition {
    pub key: String,
    pub description: String,
    /// 触发事件路由键；为空时只能手动启动
    pub trigger: Option<String>,
    pub steps: Vec<WorkflowStep>,
    pub max_attempts: i32,
}

/// 工作流定义注册表
#[derive(Debug, Clone, Default)]
pub struct WorkflowRegistry {
    definitions: Vec<WorkflowDefinition>,
}

impl WorkflowRegistry {
    pub fn new(definitions: Vec<WorkflowDefinition>) -> Self {
        Self { definitions }
    }

    pub fn builtin() -> Self {
        let tenant_webhook = WorkflowStep::Webhook { optional: true };

        Self::new(vec![
            WorkflowDefinition {
                key: "tenant_onboarding".to_string(),
                description: "新租户通知外部系统并广播入驻完成".to_string(),
                trigger: Some(routing::TENANT_CREATED.to_string()),
                steps: vec![
                    tenant_webhook.clone(),
                    WorkflowStep::PublishEvent {
                        routing_key: "workflow.tenant_onboarding.completed".to_string(),
                    },
                ],
                max_attempts: 3,
            },
            WorkflowDefinition {
                key: "payment_followup".to_string(),
                description: "付款成功后回调租户系统".to_string(),
                trigger: Some(routing::PAYMENT_SUCCEEDED.to_string()),
                steps: vec![
                    tenant_webhook,
                    WorkflowStep::PublishEvent {
                        routing_key: "workflow.payment_followup.completed".to_string(),
                    },
                ],
                max_attempts: 5,
            },
            WorkflowDefinition {
                key: "invoice_resend".to_string(),
                description: "重新发送发票邮件".to_string(),
                trigger: None,
                steps: vec![WorkflowStep::SendEmail {
                    template: EmailTemplate::InvoiceGenerated,
                    recipient_field: "email".to_string(),
                    variables: BTreeMap::from([
                        ("invoice_number".to_string(), "number".to_string()),
                        ("amount".to_string(), "amount".to_string()),
                        ("currency".to_string(), "currency".to_string()),
                    ]),
                }],
                max_attempts: 3,
            },
        ])
    }

    pub fn get(&self, key: &str) -> Option<&WorkflowDefinition> {
        self.definitions.iter().find(|d| d.key == key)
    }

    pub fn definitions(&self) -> &[WorkflowDefinition] {
        &self.definitions
    }

    /// 由某个事件触发的定义
    pub fn triggered_by(&self, event_type: &str) -> Vec<&WorkflowDefinition> {
        self.definitions
            .iter()
            .filter(|d| d.trigger.as_deref() == Some(event_type))
            .collect()
    }

    /// 去重后的触发事件
    pub fn triggers(&self) -> Vec<String> {
        let mut triggers: Vec<String> = self.definitions.iter().filter_map(|d| d.trigger.clone()).collect();
        triggers.sort();
        triggers.dedup();
        triggers
    }
}
