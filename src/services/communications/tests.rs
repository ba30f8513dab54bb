#[cfg(test)]
mod tests {
    use crate::db::entities::notification_log::{self, NotificationStatus};
    use crate::errors::{PlatformError, PlatformResult};
    use crate::messaging::topics::{routing, EMAIL_SEND_QUEUE};
    use crate::messaging::EventHandler;
    use crate::services::communications::brevo::{EmailSender, OutgoingEmail};
    use crate::services::communications::handlers::{EmailSendHandler, InvoiceEmailHandler};
    use crate::services::communications::notification::{is_valid_email, NotificationService, SendEmailRequest};
    use crate::services::communications::templates::{format_amount, render, variables_from_json, EmailTemplate};
    use crate::services::fixtures;
    use async_trait::async_trait;
    use chatwise_common::EventEnvelope;
    use sea_orm::{DatabaseBackend, MockDatabase};
    use uuid::Uuid;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct StubSender {
        fail: bool,
        calls: AtomicUsize,
        subjects: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EmailSender for StubSender {
        async fn send(&self, email: &OutgoingEmail) -> PlatformResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.subjects.lock().unwrap().push(email.subject.clone());
            if self.fail {
                Err(PlatformError::external_service("brevo", "503 Service Unavailable"))
            } else {
                Ok("<msg-1@brevo>".to_string())
            }
        }
    }

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_render_placeholders() {
        let out = render("Hi {{ name }}, invoice {{number}}.", &vars(&[("name", "Ada"), ("number", "INV-1")])).unwrap();
        assert_eq!(out, "Hi Ada, invoice INV-1.");

        let out = render("literal {{ never closed", &HashMap::new()).unwrap();
        assert_eq!(out, "literal {{ never closed");
    }

    #[test]
    fn test_missing_variable_is_validation_error() {
        let err = render("Hi {{name}}", &HashMap::new()).unwrap_err();
        assert_eq!(err.status_code(), 400);

        let err = EmailTemplate::InvoiceGenerated
            .render(&vars(&[("invoice_number", "INV-1")]))
            .unwrap_err();
        assert!(err.to_string().contains("amount") || err.to_string().contains("currency"));
    }

    #[test]
    fn test_every_template_renders_with_its_variables() {
        let all = vars(&[
            ("tenant_name", "Acme"),
            ("slug", "acme"),
            ("email", "ops@acme.io"),
            ("invoice_number", "INV-202601-ABCDEF12"),
            ("amount", "49.00"),
            ("currency", "NGN"),
            ("reference", "cw_1"),
            ("expired_at", "2026-01-31"),
        ]);
        for template in [
            EmailTemplate::Welcome,
            EmailTemplate::TrialStarted,
            EmailTemplate::InvoiceGenerated,
            EmailTemplate::PaymentReceived,
            EmailTemplate::SubscriptionExpired,
        ] {
            let rendered = template.render(&all).unwrap();
            assert!(!rendered.subject.contains("{{"), "{}", template.as_str());
            assert!(!rendered.html.contains("{{"), "{}", template.as_str());
        }
    }

    #[test]
    fn test_variables_from_json() {
        let v = variables_from_json(&json!({ "name": "Ada", "count": 3, "skip": null }));
        assert_eq!(v.get("name").map(String::as_str), Some("Ada"));
        assert_eq!(v.get("count").map(String::as_str), Some("3"));
        assert!(!v.contains_key("skip"));
        assert!(variables_from_json(&json!("not an object")).is_empty());
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(4900), "49.00");
        assert_eq!(format_amount(5), "0.05");
        assert_eq!(format_amount(-1250), "-12.50");
    }

    #[test]
    fn test_is_valid_email() {
        assert!(is_valid_email("owner@acme.io"));
        assert!(!is_valid_email("owner"));
        assert!(!is_valid_email("@acme.io"));
        assert!(!is_valid_email("owner@acme"));
        assert!(!is_valid_email("own er@acme.io"));
    }

    fn welcome_request(key: &str) -> SendEmailRequest {
        SendEmailRequest::new(
            None,
            EmailTemplate::Welcome,
            "owner@acme.io",
            json!({ "tenant_name": "Acme", "slug": "acme" }),
        )
        .with_idempotency_key(key)
    }

    #[tokio::test]
    async fn test_send_new_email_records_success() {
        let mut pending = fixtures::notification_log("welcome:1", NotificationStatus::Pending, 0);
        pending.subject = "欢迎使用 Chatwise，Acme".into();
        let mut sent = pending.clone();
        sent.status = NotificationStatus::Sent;
        sent.attempts = 1;

        let db = fixtures::connect(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<notification_log::Model>::new()])
                .append_query_results([vec![pending]])
                .append_query_results([vec![sent]]),
        );
        let sender = Arc::new(StubSender::default());
        let service = NotificationService::new(db, sender.clone(), 3);

        let log = service.send(welcome_request("welcome:1")).await.unwrap();
        assert_eq!(log.status, NotificationStatus::Sent);
        assert_eq!(sender.calls.load(Ordering::SeqCst), 1);
        assert_eq!(sender.subjects.lock().unwrap()[0], "欢迎使用 Chatwise，Acme");
    }

    #[tokio::test]
    async fn test_send_with_sent_key_does_not_resend() {
        let sent = fixtures::notification_log("welcome:1", NotificationStatus::Sent, 1);
        let db = fixtures::connect(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([vec![sent.clone()]]),
        );
        let sender = Arc::new(StubSender::default());
        let service = NotificationService::new(db, sender.clone(), 3);

        let log = service.send(welcome_request("welcome:1")).await.unwrap();
        assert_eq!(log.id, sent.id);
        assert_eq!(sender.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_send_stops_after_max_attempts() {
        let failed = fixtures::notification_log("welcome:1", NotificationStatus::Failed, 3);
        let db = fixtures::connect(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([vec![failed]]),
        );
        let sender = Arc::new(StubSender::default());
        let service = NotificationService::new(db, sender.clone(), 3);

        let log = service.send(welcome_request("welcome:1")).await.unwrap();
        assert_eq!(log.status, NotificationStatus::Failed);
        assert_eq!(sender.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_delivery_failure_is_logged() {
        let pending = fixtures::notification_log("welcome:2", NotificationStatus::Pending, 0);
        let mut failed = pending.clone();
        failed.status = NotificationStatus::Failed;
        failed.attempts = 1;

        let db = fixtures::connect(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<notification_log::Model>::new()])
                .append_query_results([vec![pending]])
                .append_query_results([vec![failed]]),
        );
        let sender = Arc::new(StubSender {
            fail: true,
            ..Default::default()
        });
        let service = NotificationService::new(db.clone(), sender, 3);

        let log = service.send(welcome_request("welcome:2")).await.unwrap();
        assert_eq!(log.status, NotificationStatus::Failed);

        drop(service);
        let log = format!("{:?}", fixtures::transaction_log(db));
        assert!(log.contains("503 Service Unavailable"));
    }

    #[tokio::test]
    async fn test_invalid_request_is_rejected_before_logging() {
        let db = fixtures::connect(MockDatabase::new(DatabaseBackend::Postgres));
        let service = NotificationService::new(db.clone(), Arc::new(StubSender::default()), 3);

        let mut request = welcome_request("welcome:3");
        request.to = "not-an-email".into();
        assert!(service.send(request).await.is_err());

        let mut request = welcome_request("welcome:3");
        request.variables = json!({ "tenant_name": "Acme" });
        assert!(service.send(request).await.is_err());

        drop(service);
        assert!(fixtures::transaction_log(db).is_empty());
    }

    #[tokio::test]
    async fn test_retry_failed_counts_results() {
        let first = fixtures::notification_log("a", NotificationStatus::Failed, 1);
        let second = fixtures::notification_log("b", NotificationStatus::Failed, 2);
        let mut first_sent = first.clone();
        first_sent.status = NotificationStatus::Sent;
        let mut second_sent = second.clone();
        second_sent.status = NotificationStatus::Sent;

        let db = fixtures::connect(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([vec![first, second]])
                .append_query_results([vec![first_sent]])
                .append_query_results([vec![second_sent]]),
        );
        let sender = Arc::new(StubSender::default());
        let service = NotificationService::new(db, sender.clone(), 3);

        let summary = service.retry_failed().await.unwrap();
        assert_eq!(summary.attempted, 2);
        assert_eq!(summary.sent, 2);
        assert_eq!(sender.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_email_send_handler_uses_work_queue() {
        let db = fixtures::connect(MockDatabase::new(DatabaseBackend::Postgres));
        let service = Arc::new(NotificationService::new(db, Arc::new(StubSender::default()), 3));
        let handler = EmailSendHandler::new(service);

        assert_eq!(handler.queue(), EMAIL_SEND_QUEUE);
        assert!(handler.bindings().is_empty());

        let event = EventEnvelope::new("email.send", None, json!({ "to": "x@y.io" }));
        assert!(handler.handle(&event).await.is_err());
    }

    #[tokio::test]
    async fn test_invoice_email_goes_to_tenant_contact() {
        let tenant = fixtures::tenant(Uuid::new_v4());
        let pending = fixtures::notification_log("invoice-email:1", NotificationStatus::Pending, 0);
        let mut sent = pending.clone();
        sent.status = NotificationStatus::Sent;

        let db = fixtures::connect(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([vec![tenant.clone()]])
                .append_query_results([Vec::<notification_log::Model>::new()])
                .append_query_results([vec![pending]])
                .append_query_results([vec![sent]]),
        );
        let notifications = Arc::new(NotificationService::new(db.clone(), Arc::new(StubSender::default()), 3));
        let handler = InvoiceEmailHandler::new(db.clone(), notifications);

        // 负载里的付款人邮箱不作为收件人
        let event = EventEnvelope::new(
            routing::INVOICE_GENERATED,
            Some(tenant.id),
            json!({
                "invoice_id": Uuid::new_v4(),
                "number": "INV-202605-ABCDEF12",
                "amount_minor": 1_500_000,
                "currency": "NGN",
                "email": "payer@elsewhere.test",
            }),
        );
        handler.handle(&event).await.unwrap();

        drop(handler);
        let log = format!("{:?}", fixtures::transaction_log(db));
        assert!(log.contains(&tenant.contact_email));
        assert!(!log.contains("payer@elsewhere.test"));
    }
}
