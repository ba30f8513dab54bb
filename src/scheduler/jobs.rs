// 内置定时任务

use super::ScheduledJob;
use crate::db::repositories::ProcessedEventRepository;
use crate::errors::PlatformResult;
use crate::services::billing::{SubscriptionService, UsageService};
use crate::services::communications::NotificationService;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

/// 标记过期订阅；`subscription.expired` 由订阅服务在状态转换时发布
pub struct ExpireSubscriptionsJob {
    subscriptions: SubscriptionService,
}

impl ExpireSubscriptionsJob {
    pub fn new(subscriptions: SubscriptionService) -> Self {
        Self { subscriptions }
    }
}

#[async_trait]
impl ScheduledJob for ExpireSubscriptionsJob {
    fn name(&self) -> &'static str {
        "expire_subscriptions"
    }

    async fn run(&self) -> PlatformResult<u64> {
        Ok(self.subscriptions.expire_overdue().await?.len() as u64)
    }
}

/// 每月用量清零
pub struct ResetUsageJob {
    usage: Arc<UsageService>,
}

impl ResetUsageJob {
    pub fn new(usage: Arc<UsageService>) -> Self {
        Self { usage }
    }
}

#[async_trait]
impl ScheduledJob for ResetUsageJob {
    fn name(&self) -> &'static str {
        "reset_usage"
    }

    async fn run(&self) -> PlatformResult<u64> {
        self.usage.reset_all().await
    }
}

/// 重发失败邮件
pub struct RetryNotificationsJob {
    notifications: Arc<NotificationService>,
}

impl RetryNotificationsJob {
    pub fn new(notifications: Arc<NotificationService>) -> Self {
        Self { notifications }
    }
}

#[async_trait]
impl ScheduledJob for RetryNotificationsJob {
    fn name(&self) -> &'static str {
        "retry_notifications"
    }

    async fn run(&self) -> PlatformResult<u64> {
        Ok(self.notifications.retry_failed().await?.attempted as u64)
    }
}

/// 清理过期的已处理事件记录
pub struct PurgeProcessedEventsJob {
    db: Arc<DatabaseConnection>,
    retention_days: i64,
}

impl PurgeProcessedEventsJob {
    pub fn new(db: Arc<DatabaseConnection>, retention_days: i64) -> Self {
        Self {
            db,
            retention_days: retention_days.max(1),
        }
    }
}

#[async_trait]
impl ScheduledJob for PurgeProcessedEventsJob {
    fn name(&self) -> &'static str {
        "purge_processed_events"
    }

    async fn run(&self) -> PlatformResult<u64> {
        let before = Utc::now() - Duration::days(self.retention_days);
        ProcessedEventRepository::purge_before(self.db.as_ref(), before).await
    }
}
