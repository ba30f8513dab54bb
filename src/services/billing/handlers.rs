// 计费事件消费者

use crate::errors::{PlatformError, PlatformResult};
use crate::messaging::topics::{routing, TENANT_EXCHANGE};
use crate::messaging::{Binding, EventHandler};
use crate::services::billing::subscription::SubscriptionService;
use async_trait::async_trait;
use chatwise_common::EventEnvelope;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

/// `user.created` 负载
#[derive(Debug, Clone, Deserialize)]
pub struct UserCreatedPayload {
    #[serde(default)]
    pub tenant_id: Option<Uuid>,
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// 新用户注册后为其租户开通试用
pub struct UserCreatedHandler {
    subscriptions: SubscriptionService,
}

impl UserCreatedHandler {
    pub fn new(subscriptions: SubscriptionService) -> Self {
        Self { subscriptions }
    }
}

#[async_trait]
impl EventHandler for UserCreatedHandler {
    fn name(&self) -> &'static str {
        "billing.user_created"
    }

    fn bindings(&self) -> Vec<Binding> {
        vec![Binding::new(TENANT_EXCHANGE, routing::USER_CREATED)]
    }

    async fn handle(&self, event: &EventEnvelope) -> PlatformResult<()> {
        let payload: UserCreatedPayload = event.payload_as()?;
        let tenant_id = payload
            .tenant_id
            .or(event.tenant_id)
            .ok_or_else(|| PlatformError::validation("tenant_id", "user.created 缺少租户"))?;

        let subscription = self.subscriptions.create_trial(tenant_id).await?;
        info!(tenant_id = %tenant_id, user_id = %payload.user_id, subscription_id = %subscription.id, "已为新用户开通试用");
        Ok(())
    }
}
