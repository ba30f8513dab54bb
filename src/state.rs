// 应用状态
// 组装各业务服务，供 HTTP 处理器、事件消费者与定时任务共享

use crate::config::{AppConfig, ServiceKind};
use crate::errors::PlatformResult;
use crate::messaging::{EventHandler, MessageBroker};
use crate::scheduler::{ExpireSubscriptionsJob, PurgeProcessedEventsJob, ResetUsageJob, RetryNotificationsJob, Scheduler};
use crate::services::auth::TokenValidator;
use crate::services::billing::{
    InvoiceService, PaymentGateway, PaymentService, PlanService, SubscriptionService, UsageEventHandler, UsageService,
    UserCreatedHandler,
};
use crate::services::chat::ChatService;
use crate::services::communications::{
    EmailSendHandler, EmailSender, InvoiceEmailHandler, NotificationService, PaymentReceivedHandler,
    SubscriptionExpiredHandler, TrialStartedEmailHandler, WelcomeEmailHandler,
};
use crate::services::onboarding::{IngestionService, ObjectStore, TenantService};
use crate::services::quality::{AnswerGeneratedHandler, QualityService};
use crate::services::workflow::{WorkflowRegistry, WorkflowService, WorkflowTriggerHandler};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

/// 外部服务商接入
pub struct Providers {
    pub broker: Arc<dyn MessageBroker>,
    pub payments: Arc<dyn PaymentGateway>,
    pub email: Arc<dyn EmailSender>,
    pub storage: Arc<dyn ObjectStore>,
    pub validator: Arc<TokenValidator>,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Arc<DatabaseConnection>,
    pub broker: Arc<dyn MessageBroker>,
    pub validator: Arc<TokenValidator>,
    pub subscriptions: SubscriptionService,
    pub usage: Arc<UsageService>,
    pub plans: Arc<PlanService>,
    pub invoices: Arc<InvoiceService>,
    pub payments: Arc<PaymentService>,
    pub chat: Arc<ChatService>,
    pub quality: Arc<QualityService>,
    pub notifications: Arc<NotificationService>,
    pub tenants: Arc<TenantService>,
    pub ingestion: Arc<IngestionService>,
    pub workflows: Arc<WorkflowService>,
}

impl AppState {
    pub fn new(config: AppConfig, db: Arc<DatabaseConnection>, providers: Providers) -> PlatformResult<Self> {
        let Providers {
            broker,
            payments,
            email,
            storage,
            validator,
        } = providers;

        let subscriptions = SubscriptionService::new(db.clone(), broker.clone(), &config.billing);
        let usage = Arc::new(UsageService::new(db.clone(), subscriptions.clone()));
        let invoices = Arc::new(InvoiceService::new(db.clone()));
        let payments = Arc::new(PaymentService::new(
            db.clone(),
            payments,
            broker.clone(),
            invoices.clone(),
            &config.billing,
        ));

        Ok(Self {
            plans: Arc::new(PlanService::new(db.clone(), config.billing.currency.clone())),
            chat: Arc::new(ChatService::new(db.clone(), broker.clone(), usage.clone())),
            quality: Arc::new(QualityService::new(db.clone(), config.quality.clone())),
            notifications: Arc::new(NotificationService::new(db.clone(), email, config.email.max_attempts)),
            tenants: Arc::new(TenantService::new(db.clone(), broker.clone())),
            ingestion: Arc::new(IngestionService::new(
                db.clone(),
                broker.clone(),
                storage,
                usage.clone(),
                config.storage.clone(),
            )),
            workflows: Arc::new(WorkflowService::new(db.clone(), broker.clone(), WorkflowRegistry::builtin())?),
            config: Arc::new(config),
            db,
            broker,
            validator,
            subscriptions,
            usage,
            invoices,
            payments,
        })
    }

    pub fn is_enabled(&self, kind: ServiceKind) -> bool {
        self.config.service_enabled(kind)
    }

    /// 已启用服务的事件消费者
    pub fn event_handlers(&self) -> Vec<Arc<dyn EventHandler>> {
        let mut handlers: Vec<Arc<dyn EventHandler>> = Vec::new();

        if self.is_enabled(ServiceKind::Billing) {
            handlers.push(Arc::new(UserCreatedHandler::new(self.subscriptions.clone())));
            handlers.push(Arc::new(UsageEventHandler::new(self.usage.clone())));
        }
        if self.is_enabled(ServiceKind::Quality) {
            handlers.push(Arc::new(AnswerGeneratedHandler::new(self.quality.clone())));
        }
        if self.is_enabled(ServiceKind::Communications) {
            let notifications = &self.notifications;
            handlers.push(Arc::new(EmailSendHandler::new(notifications.clone())));
            handlers.push(Arc::new(WelcomeEmailHandler::new(notifications.clone())));
            handlers.push(Arc::new(TrialStartedEmailHandler::new(notifications.clone())));
            handlers.push(Arc::new(InvoiceEmailHandler::new(self.db.clone(), notifications.clone())));
            handlers.push(Arc::new(PaymentReceivedHandler::new(self.db.clone(), notifications.clone())));
            handlers.push(Arc::new(SubscriptionExpiredHandler::new(self.db.clone(), notifications.clone())));
        }
        if self.is_enabled(ServiceKind::Workflow) {
            handlers.push(Arc::new(WorkflowTriggerHandler::new(self.db.clone(), self.workflows.clone())));
        }

        handlers
    }

    /// 已启用服务的定时任务
    pub fn scheduler(&self) -> PlatformResult<Scheduler> {
        let config = &self.config.scheduler;
        let mut scheduler = Scheduler::new();

        if self.is_enabled(ServiceKind::Billing) {
            scheduler.add(
                &config.expire_subscriptions_cron,
                Arc::new(ExpireSubscriptionsJob::new(self.subscriptions.clone())),
            )?;
            scheduler.add(&config.reset_usage_cron, Arc::new(ResetUsageJob::new(self.usage.clone())))?;
        }
        if self.is_enabled(ServiceKind::Communications) {
            scheduler.add(
                &config.retry_notifications_cron,
                Arc::new(RetryNotificationsJob::new(self.notifications.clone())),
            )?;
        }
        scheduler.add(
            &config.purge_events_cron,
            Arc::new(PurgeProcessedEventsJob::new(self.db.clone(), config.processed_event_retention_days)),
        )?;

        Ok(scheduler)
    }
}
