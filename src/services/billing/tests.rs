// 计费服务测试

#[cfg(test)]
mod tests {
    use crate::config::{AppConfig, BillingConfig};
    use crate::db::entities::plan::PlanLimits;
    use crate::db::entities::{invoice::InvoiceStatus, payment::PaymentStatus, subscription::SubscriptionStatus};
    use crate::errors::{PlatformError, PlatformResult};
    use crate::messaging::{routing, EventHandler, InMemoryBroker};
    use crate::services::billing::invoice::invoice_number;
    use crate::services::billing::payment::summarize_revenue;
    use crate::services::billing::paystack::{self, InitializeTransaction, InitializedTransaction, TransactionDetails};
    use crate::services::billing::plans::validate_plan_code;
    use crate::services::billing::subscription::effective_status;
    use crate::services::billing::usage::{check_limit, usage_deltas, UsageEventPayload};
    use crate::services::billing::*;
    use crate::services::fixtures;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};
    use sea_orm::{DatabaseBackend, DatabaseConnection, DbErr, MockDatabase, MockExecResult};
    use serde_json::json;
    use std::sync::Arc;
    use uuid::Uuid;

    const SECRET: &str = "sk_test_secret";

    fn billing_config() -> BillingConfig {
        let mut config = AppConfig::default().billing;
        config.paystack_secret_key = SECRET.to_string();
        config
    }

    struct StubGateway;

    #[async_trait]
    impl PaymentGateway for StubGateway {
        async fn initialize(&self, request: &InitializeTransaction) -> PlatformResult<InitializedTransaction> {
            Ok(InitializedTransaction {
                authorization_url: format!("https://checkout.paystack.test/{}", request.reference),
                access_code: "code".into(),
                reference: request.reference.clone(),
            })
        }

        async fn verify(&self, reference: &str) -> PlatformResult<TransactionDetails> {
            Err(PlatformError::external_service("paystack", format!("unexpected verify {}", reference)))
        }
    }

    fn payment_service(db: Arc<DatabaseConnection>, broker: Arc<InMemoryBroker>) -> PaymentService {
        PaymentService::new(
            db.clone(),
            Arc::new(StubGateway),
            broker,
            Arc::new(InvoiceService::new(db)),
            &billing_config(),
        )
    }

    fn subscription_service(db: Arc<DatabaseConnection>, broker: Arc<InMemoryBroker>) -> SubscriptionService {
        SubscriptionService::new(db, broker, &billing_config())
    }

    fn exec(rows_affected: u64) -> MockExecResult {
        MockExecResult { last_insert_id: 0, rows_affected }
    }

    const CHARGE_OK: &[u8] =
        br#"{"event":"charge.success","data":{"reference":"cw_ok","status":"success","amount":1500000,"paid_at":"2024-05-02T10:00:00Z"}}"#;

    #[test]
    fn test_usage_decrement_never_goes_negative() {
        let mut usage = UsageCounters { messages: 3, documents: 1, storage_bytes: 500 };

        usage.apply(UsageMetric::Documents, -1);
        usage.apply(UsageMetric::Documents, -1);
        usage.apply(UsageMetric::StorageBytes, -10_000);
        usage.apply(UsageMetric::Messages, i64::MIN);

        assert_eq!(usage, UsageCounters::default());

        usage.apply(UsageMetric::Messages, 2);
        assert_eq!(usage.messages, 2);
    }

    #[test]
    fn test_usage_counters_tolerate_bad_json() {
        assert_eq!(UsageCounters::from_json(&json!("garbage")), UsageCounters::default());
        assert_eq!(UsageCounters::from_json(&json!({ "messages": 7 })).messages, 7);
    }

    #[test]
    fn test_check_limit() {
        let limits = PlanLimits { max_messages: 10, max_documents: 0, max_storage_bytes: 100 };
        let usage = UsageCounters { messages: 9, documents: 1_000, storage_bytes: 100 };

        assert!(check_limit(&limits, &usage, UsageMetric::Messages, 1).allowed);
        assert!(!check_limit(&limits, &usage, UsageMetric::Messages, 2).allowed);
        // 0 表示不限
        assert!(check_limit(&limits, &usage, UsageMetric::Documents, 50).allowed);
        assert_eq!(check_limit(&limits, &usage, UsageMetric::Documents, 0).remaining(), None);
        assert_eq!(check_limit(&limits, &usage, UsageMetric::StorageBytes, 0).remaining(), Some(0));
    }

    #[test]
    fn test_usage_deltas_by_routing_key() {
        let payload = UsageEventPayload { count: 1, bytes: 2048 };
        assert_eq!(
            usage_deltas(routing::USAGE_DOCUMENT_REMOVED, &payload),
            Some(vec![(UsageMetric::Documents, -1), (UsageMetric::StorageBytes, -2048)])
        );
        assert_eq!(
            usage_deltas(routing::USAGE_MESSAGE_ADDED, &payload),
            Some(vec![(UsageMetric::Messages, 1)])
        );
        assert_eq!(usage_deltas("usage.unknown", &payload), None);

        let defaulted: UsageEventPayload = serde_json::from_value(json!({})).unwrap();
        assert_eq!(defaulted.count, 1);
    }

    #[test]
    fn test_effective_status_expires_lazily() {
        let now = Utc::now();
        let past = (now - Duration::seconds(1)).into();
        let future = (now + Duration::days(1)).into();

        assert_eq!(effective_status(SubscriptionStatus::Active, past, now), SubscriptionStatus::Expired);
        assert_eq!(effective_status(SubscriptionStatus::Trialing, past, now), SubscriptionStatus::Expired);
        assert_eq!(effective_status(SubscriptionStatus::Active, future, now), SubscriptionStatus::Active);
        assert_eq!(effective_status(SubscriptionStatus::Cancelled, past, now), SubscriptionStatus::Cancelled);
    }

    #[test]
    fn test_webhook_signature() {
        let body = br#"{"event":"charge.success"}"#;
        let signature = paystack::sign(SECRET, body).unwrap();

        assert_eq!(signature.len(), 128);
        assert!(paystack::verify_signature(SECRET, body, &signature));
        assert!(!paystack::verify_signature("other", body, &signature));
        assert!(!paystack::verify_signature(SECRET, b"tampered", &signature));
        assert!(!paystack::verify_signature(SECRET, body, "not-hex"));
    }

    #[test]
    fn test_invoice_number_format() {
        let issued = Utc.with_ymd_and_hms(2024, 5, 17, 10, 0, 0).unwrap();
        let id = Uuid::parse_str("a1b2c3d4-0000-0000-0000-000000000000").unwrap();
        assert_eq!(invoice_number(issued, id), "INV-202405-A1B2C3D4");
    }

    #[test]
    fn test_plan_code_validation() {
        assert!(validate_plan_code("growth").is_ok());
        assert!(validate_plan_code("pro_2024").is_ok());
        assert!(validate_plan_code("G").is_err());
        assert!(validate_plan_code("Growth Plan").is_err());
    }

    #[test]
    fn test_revenue_summary() {
        let tenant_id = Uuid::new_v4();
        let plan_id = Uuid::new_v4();
        let mut paid = fixtures::payment(tenant_id, plan_id, "ref-1", 1_500_000);
        paid.status = PaymentStatus::Success;
        paid.paid_at = Some(Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap().into());
        let mut paid_again = paid.clone();
        paid_again.paid_at = Some(Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 0).unwrap().into());
        let mut failed = fixtures::payment(tenant_id, plan_id, "ref-2", 1_500_000);
        failed.status = PaymentStatus::Failed;

        let summary = summarize_revenue(&[paid, paid_again, failed]);
        assert_eq!(summary.total_collected_minor, 3_000_000);
        assert_eq!(summary.payments_by_status.get("success"), Some(&2));
        assert_eq!(summary.payments_by_status.get("failed"), Some(&1));
        assert_eq!(summary.monthly.get("2024-05"), Some(&1_500_000));
        assert_eq!(summary.monthly.len(), 2);
    }

    #[tokio::test]
    async fn test_current_marks_overdue_subscription_expired() {
        let tenant_id = Uuid::new_v4();
        let stored = fixtures::subscription(tenant_id, Uuid::new_v4(), SubscriptionStatus::Active, fixtures::days_from_now(-1));

        let db = fixtures::connect(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([vec![stored.clone()]])
                .append_exec_results([exec(1)]),
        );
        let broker = Arc::new(InMemoryBroker::new());
        let service = subscription_service(db.clone(), broker.clone());

        let current = service.current(tenant_id).await.unwrap().unwrap();
        assert_eq!(current.status, SubscriptionStatus::Expired);

        let events = broker.messages_for(routing::SUBSCRIPTION_EXPIRED);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.dedup_key(), format!("subscription-expired:{}", stored.id));

        drop(service);
        let log = fixtures::transaction_log(db);
        assert_eq!(log.len(), 2);
        let update = format!("{:?}", log[1]);
        assert!(update.contains("UPDATE"));
        assert!(update.contains("expired"));
    }

    #[tokio::test]
    async fn test_lazy_expiry_then_job_publishes_once() {
        let tenant_id = Uuid::new_v4();
        let stored = fixtures::subscription(tenant_id, Uuid::new_v4(), SubscriptionStatus::Trialing, fixtures::days_from_now(-2));

        // 读取时完成转换后，定时任务查不到这条记录
        let db = fixtures::connect(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([vec![stored.clone()]])
                .append_exec_results([exec(1)])
                .append_query_results([Vec::<crate::db::entities::subscription::Model>::new()]),
        );
        let broker = Arc::new(InMemoryBroker::new());
        let service = subscription_service(db, broker.clone());

        service.current(tenant_id).await.unwrap();
        assert!(service.expire_overdue().await.unwrap().is_empty());

        assert_eq!(broker.messages_for(routing::SUBSCRIPTION_EXPIRED).len(), 1);
    }

    #[tokio::test]
    async fn test_expiry_lost_race_does_not_publish() {
        let tenant_id = Uuid::new_v4();
        let stored = fixtures::subscription(tenant_id, Uuid::new_v4(), SubscriptionStatus::Active, fixtures::days_from_now(-1));

        let db = fixtures::connect(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([vec![stored]])
                .append_exec_results([exec(0)]),
        );
        let broker = Arc::new(InMemoryBroker::new());
        let service = subscription_service(db, broker.clone());

        let current = service.current(tenant_id).await.unwrap().unwrap();
        assert_eq!(current.status, SubscriptionStatus::Expired);
        assert!(broker.messages().is_empty());
    }

    #[tokio::test]
    async fn test_current_leaves_live_subscription_untouched() {
        let tenant_id = Uuid::new_v4();
        let stored = fixtures::subscription(tenant_id, Uuid::new_v4(), SubscriptionStatus::Trialing, fixtures::days_from_now(5));

        let db = fixtures::connect(MockDatabase::new(DatabaseBackend::Postgres).append_query_results([vec![stored.clone()]]));
        let service = subscription_service(db.clone(), Arc::new(InMemoryBroker::new()));

        assert_eq!(service.current(tenant_id).await.unwrap(), Some(stored));
        drop(service);
        assert_eq!(fixtures::transaction_log(db).len(), 1);
    }

    #[tokio::test]
    async fn test_create_trial_is_idempotent() {
        let tenant_id = Uuid::new_v4();
        let existing = fixtures::subscription(tenant_id, Uuid::new_v4(), SubscriptionStatus::Trialing, fixtures::days_from_now(10));

        let db = fixtures::connect(MockDatabase::new(DatabaseBackend::Postgres).append_query_results([vec![existing.clone()]]));
        let service = subscription_service(db.clone(), Arc::new(InMemoryBroker::new()));

        assert_eq!(service.create_trial(tenant_id).await.unwrap().id, existing.id);
        drop(service);
        assert_eq!(fixtures::transaction_log(db).len(), 1);
    }

    #[tokio::test]
    async fn test_ensure_can_consume_rejects_over_limit() {
        let tenant_id = Uuid::new_v4();
        let plan = fixtures::plan("starter", 0, 500);
        let mut current = fixtures::subscription(tenant_id, plan.id, SubscriptionStatus::Trialing, fixtures::days_from_now(5));
        current.usage = json!({ "messages": 500 });

        let db = fixtures::connect(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([vec![current]])
                .append_query_results([vec![plan]]),
        );
        let usage = UsageService::new(db.clone(), subscription_service(db, Arc::new(InMemoryBroker::new())));

        let err = usage.ensure_can_consume(tenant_id, UsageMetric::Messages, 1).await.unwrap_err();
        assert_eq!(err.status_code(), 402);
        assert!(matches!(err, PlatformError::PaymentRequired { metric: Some(ref m), .. } if m == "messages"));
    }

    #[tokio::test]
    async fn test_ensure_can_consume_requires_live_subscription() {
        let tenant_id = Uuid::new_v4();
        let cancelled = fixtures::subscription(tenant_id, Uuid::new_v4(), SubscriptionStatus::Cancelled, fixtures::days_from_now(5));

        let db = fixtures::connect(MockDatabase::new(DatabaseBackend::Postgres).append_query_results([vec![cancelled]]));
        let usage = UsageService::new(db.clone(), subscription_service(db, Arc::new(InMemoryBroker::new())));

        let err = usage.ensure_can_consume(tenant_id, UsageMetric::Messages, 1).await.unwrap_err();
        assert!(matches!(err, PlatformError::PaymentRequired { metric: None, .. }));
    }

    #[tokio::test]
    async fn test_webhook_rejects_bad_signature() {
        let db = fixtures::connect(MockDatabase::new(DatabaseBackend::Postgres));
        let service = payment_service(db, Arc::new(InMemoryBroker::new()));
        let body = br#"{"event":"charge.success","data":{"reference":"r","status":"success","amount":1}}"#;

        let missing = service.handle_webhook(body, None).await.unwrap_err();
        assert_eq!(missing.status_code(), 401);

        let wrong = service.handle_webhook(body, Some("deadbeef")).await.unwrap_err();
        assert_eq!(wrong.status_code(), 401);
    }

    #[tokio::test]
    async fn test_duplicate_webhook_processed_once() {
        let db = fixtures::connect(MockDatabase::new(DatabaseBackend::Postgres).append_exec_results([exec(0)]));
        let broker = Arc::new(InMemoryBroker::new());
        let service = payment_service(db, broker.clone());

        let body = br#"{"event":"charge.success","data":{"reference":"cw_1","status":"success","amount":1500000}}"#;
        let signature = paystack::sign(SECRET, body).unwrap();

        assert_eq!(service.handle_webhook(body, Some(&signature)).await.unwrap(), WebhookOutcome::Duplicate);
        assert!(broker.messages().is_empty());
    }

    #[tokio::test]
    async fn test_unrelated_webhook_is_ignored() {
        let db = fixtures::connect(MockDatabase::new(DatabaseBackend::Postgres));
        let service = payment_service(db, Arc::new(InMemoryBroker::new()));

        let body = br#"{"event":"transfer.success","data":{"reference":"t1","status":"success","amount":5}}"#;
        let signature = paystack::sign(SECRET, body).unwrap();

        assert_eq!(service.handle_webhook(body, Some(&signature)).await.unwrap(), WebhookOutcome::Ignored);
    }

    struct Charge {
        tenant_id: Uuid,
        plan: crate::db::entities::plan::Model,
        pending: crate::db::entities::payment::Model,
        paid: crate::db::entities::payment::Model,
        trial: crate::db::entities::subscription::Model,
        activated: crate::db::entities::subscription::Model,
        invoice: crate::db::entities::invoice::Model,
    }

    fn charge() -> Charge {
        let tenant_id = Uuid::new_v4();
        let plan = fixtures::plan("growth", 1_500_000, 10_000);
        let pending = fixtures::payment(tenant_id, plan.id, "cw_ok", 1_500_000);
        let mut paid = pending.clone();
        paid.status = PaymentStatus::Success;
        paid.paid_at = Some(fixtures::now());
        let trial = fixtures::subscription(tenant_id, plan.id, SubscriptionStatus::Trialing, fixtures::days_from_now(3));
        let mut activated = trial.clone();
        activated.status = SubscriptionStatus::Active;
        let mut invoice = fixtures::invoice(tenant_id, InvoiceStatus::Paid);
        invoice.payment_id = Some(pending.id);
        invoice.subscription_id = Some(trial.id);
        Charge { tenant_id, plan, pending, paid, trial, activated, invoice }
    }

    #[tokio::test]
    async fn test_successful_charge_activates_and_invoices() {
        let charge = charge();
        let db = fixtures::connect(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([exec(1), exec(1)])
                .append_query_results([vec![charge.pending.clone()]])
                .append_query_results([vec![charge.plan.clone()]])
                .append_query_results([vec![charge.trial.clone()]])
                .append_query_results([vec![charge.activated.clone()]])
                .append_query_results([vec![charge.invoice.clone()]]),
        );
        let broker = Arc::new(InMemoryBroker::new());
        let service = payment_service(db.clone(), broker.clone());

        let signature = paystack::sign(SECRET, CHARGE_OK).unwrap();
        assert_eq!(service.handle_webhook(CHARGE_OK, Some(&signature)).await.unwrap(), WebhookOutcome::Processed);

        let succeeded = broker.messages_for(routing::PAYMENT_SUCCEEDED);
        assert_eq!(succeeded.len(), 1);
        assert_eq!(succeeded[0].event.tenant_id, Some(charge.tenant_id));
        assert_eq!(succeeded[0].event.dedup_key(), "payment:cw_ok");

        let generated = broker.messages_for(routing::INVOICE_GENERATED);
        assert_eq!(generated.len(), 1);
        assert_eq!(generated[0].event.payload["number"], json!(charge.invoice.number));

        // 认领支付、激活订阅和生成发票在同一事务内
        drop(service);
        let log = fixtures::transaction_log(db);
        let txn = format!("{:?}", log.last().unwrap());
        assert!(txn.contains("BEGIN"));
        assert!(txn.contains(r#"UPDATE \"payments\""#));
        assert!(txn.contains(r#"INSERT INTO \"invoices\""#));
        assert!(txn.contains("COMMIT"));
    }

    #[tokio::test]
    async fn test_charge_retried_after_activation_failure() {
        let charge = charge();
        let db = fixtures::connect(
            MockDatabase::new(DatabaseBackend::Postgres)
                // 首次投递：登记、认领、激活失败后删除登记
                .append_exec_results([exec(1), exec(1), exec(1)])
                .append_query_results([vec![charge.pending.clone()]])
                .append_query_results([vec![charge.plan.clone()]])
                .append_query_errors([DbErr::Custom("connection reset".into())])
                // 重新投递
                .append_exec_results([exec(1), exec(1)])
                .append_query_results([vec![charge.pending.clone()]])
                .append_query_results([vec![charge.plan.clone()]])
                .append_query_results([vec![charge.trial.clone()]])
                .append_query_results([vec![charge.activated.clone()]])
                .append_query_results([vec![charge.invoice.clone()]]),
        );
        let broker = Arc::new(InMemoryBroker::new());
        let service = payment_service(db.clone(), broker.clone());
        let signature = paystack::sign(SECRET, CHARGE_OK).unwrap();

        assert!(service.handle_webhook(CHARGE_OK, Some(&signature)).await.is_err());
        assert!(broker.messages().is_empty());

        assert_eq!(service.handle_webhook(CHARGE_OK, Some(&signature)).await.unwrap(), WebhookOutcome::Processed);
        assert_eq!(broker.messages_for(routing::PAYMENT_SUCCEEDED).len(), 1);
        assert_eq!(broker.messages_for(routing::INVOICE_GENERATED).len(), 1);

        drop(service);
        let log = fixtures::transaction_log(db);
        let rolled_back = log.iter().map(|t| format!("{:?}", t)).filter(|t| t.contains("ROLLBACK")).count();
        assert_eq!(rolled_back, 1);
    }

    #[tokio::test]
    async fn test_completed_payment_republishes_events() {
        let charge = charge();
        let db = fixtures::connect(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([exec(1)])
                .append_query_results([vec![charge.paid.clone()]])
                .append_query_results([vec![charge.invoice.clone()]]),
        );
        let broker = Arc::new(InMemoryBroker::new());
        let service = payment_service(db, broker.clone());
        let signature = paystack::sign(SECRET, CHARGE_OK).unwrap();

        assert_eq!(service.handle_webhook(CHARGE_OK, Some(&signature)).await.unwrap(), WebhookOutcome::Processed);

        let succeeded = broker.messages_for(routing::PAYMENT_SUCCEEDED);
        assert_eq!(succeeded.len(), 1);
        assert_eq!(succeeded[0].event.dedup_key(), "payment:cw_ok");
        assert_eq!(succeeded[0].event.payload["subscription_id"], json!(charge.trial.id));
        assert_eq!(
            broker.messages_for(routing::INVOICE_GENERATED)[0].event.dedup_key(),
            format!("invoice:{}", charge.invoice.id)
        );
    }

    #[tokio::test]
    async fn test_concurrently_claimed_payment_is_not_activated_twice() {
        let charge = charge();
        let db = fixtures::connect(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([exec(1), exec(0)])
                .append_query_results([vec![charge.pending.clone()]])
                .append_query_results([vec![charge.plan.clone()]])
                .append_query_results([vec![charge.paid.clone()]])
                .append_query_results([vec![charge.invoice.clone()]]),
        );
        let broker = Arc::new(InMemoryBroker::new());
        let service = payment_service(db.clone(), broker.clone());
        let signature = paystack::sign(SECRET, CHARGE_OK).unwrap();

        assert_eq!(service.handle_webhook(CHARGE_OK, Some(&signature)).await.unwrap(), WebhookOutcome::Processed);
        assert_eq!(broker.messages_for(routing::PAYMENT_SUCCEEDED).len(), 1);

        drop(service);
        let log = format!("{:?}", fixtures::transaction_log(db));
        assert!(!log.contains(r#"UPDATE \"subscriptions\""#));
        assert!(!log.contains(r#"INSERT INTO \"invoices\""#));
    }

    #[tokio::test]
    async fn test_checkout_rejects_free_plan() {
        let free = fixtures::plan("starter", 0, 500);
        let db = fixtures::connect(MockDatabase::new(DatabaseBackend::Postgres).append_query_results([vec![free.clone()]]));
        let service = payment_service(db, Arc::new(InMemoryBroker::new()));

        let err = service
            .initiate_checkout(Uuid::new_v4(), free.id, "owner@acme.test")
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_user_created_handler_starts_trial() {
        let tenant_id = Uuid::new_v4();
        let existing = fixtures::subscription(tenant_id, Uuid::new_v4(), SubscriptionStatus::Trialing, fixtures::days_from_now(14));
        let db = fixtures::connect(MockDatabase::new(DatabaseBackend::Postgres).append_query_results([vec![existing]]));
        let handler = UserCreatedHandler::new(subscription_service(db, Arc::new(InMemoryBroker::new())));

        let event = chatwise_common::EventEnvelope::new(
            routing::USER_CREATED,
            Some(tenant_id),
            json!({ "user_id": "user-1", "email": "owner@acme.test" }),
        );
        assert!(handler.handle(&event).await.is_ok());

        let missing_tenant = chatwise_common::EventEnvelope::new(routing::USER_CREATED, None, json!({ "user_id": "u" }));
        assert!(handler.handle(&missing_tenant).await.is_err());
    }
}
