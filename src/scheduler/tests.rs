#[cfg(test)]
mod tests {
    use crate::config::AppConfig;
    use crate::db::entities::subscription::SubscriptionStatus;
    use crate::errors::{PlatformError, PlatformResult};
    use crate::messaging::topics::routing;
    use crate::messaging::InMemoryBroker;
    use crate::scheduler::{next_run, parse_schedule, run_once, ExpireSubscriptionsJob, ScheduledJob, Scheduler};
    use crate::services::billing::SubscriptionService;
    use crate::services::fixtures;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    struct CountingJob {
        runs: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl ScheduledJob for CountingJob {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn run(&self) -> PlatformResult<u64> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(PlatformError::database("connection reset"))
            } else {
                Ok(3)
            }
        }
    }

    #[test]
    fn test_parse_schedule() {
        let config = AppConfig::default().scheduler;
        for expression in [
            &config.expire_subscriptions_cron,
            &config.reset_usage_cron,
            &config.retry_notifications_cron,
            &config.purge_events_cron,
        ] {
            assert!(parse_schedule(expression).is_ok(), "{}", expression);
        }
        assert!(parse_schedule("every monday").is_err());
    }

    #[test]
    fn test_next_run_for_monthly_reset() {
        let schedule = parse_schedule("0 0 0 1 * *").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 1, 15, 10, 30, 0).unwrap();
        assert_eq!(next_run(&schedule, after), Some(Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()));
    }

    #[tokio::test]
    async fn test_run_once_reports_failure_without_panicking() {
        let ok = CountingJob { runs: AtomicUsize::new(0), fail: false };
        let failing = CountingJob { runs: AtomicUsize::new(0), fail: true };

        assert!(run_once(&ok).await);
        assert!(!run_once(&failing).await);
        assert_eq!(failing.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_scheduler_stops_on_cancel() {
        let mut scheduler = Scheduler::new();
        assert!(scheduler
            .add("bad expression", Arc::new(CountingJob { runs: AtomicUsize::new(0), fail: false }))
            .is_err());

        let job = Arc::new(CountingJob { runs: AtomicUsize::new(0), fail: false });
        scheduler.add("0 0 0 1 1 *", job.clone()).unwrap();
        assert_eq!(scheduler.job_names(), vec!["counting"]);

        let shutdown = CancellationToken::new();
        let handles = scheduler.spawn(shutdown.clone());
        shutdown.cancel();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
        }
        assert_eq!(job.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_expire_job_publishes_expiry_events() {
        let tenant_id = Uuid::new_v4();
        let overdue = fixtures::subscription(tenant_id, Uuid::new_v4(), SubscriptionStatus::Active, fixtures::days_from_now(-1));

        let db = fixtures::connect(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([vec![overdue.clone()]])
                .append_exec_results([MockExecResult { last_insert_id: 0, rows_affected: 1 }]),
        );
        let broker = Arc::new(InMemoryBroker::new());
        let subscriptions = SubscriptionService::new(db, broker.clone(), &AppConfig::default().billing);
        let job = ExpireSubscriptionsJob::new(subscriptions);

        assert_eq!(job.run().await.unwrap(), 1);

        let events = broker.messages_for(routing::SUBSCRIPTION_EXPIRED);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.tenant_id, Some(tenant_id));
        assert_eq!(events[0].event.dedup_key(), format!("subscription-expired:{}", overdue.id));
    }
}
