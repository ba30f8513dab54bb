// 消息模块测试

#[cfg(test)]
mod tests {
    use crate::errors::{PlatformError, PlatformResult};
    use crate::messaging::amqp::{dead_letter_queue, retry_count_from};
    use crate::messaging::topics::{exchange_for, topic_matches, BILLING_EXCHANGE, RETRY_COUNT_HEADER, USAGE_EXCHANGE};
    use crate::messaging::*;
    use async_trait::async_trait;
    use chatwise_common::EventEnvelope;
    use lapin::types::{AMQPValue, FieldTable, ShortString};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    /// 前 `failures` 次调用失败的处理器
    struct FlakyHandler {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyHandler {
        fn new(failures: u32) -> Self {
            Self { failures, calls: AtomicU32::new(0) }
        }
    }

    #[async_trait]
    impl EventHandler for FlakyHandler {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn bindings(&self) -> Vec<Binding> {
            vec![Binding::new(USAGE_EXCHANGE, "usage.#")]
        }

        async fn handle(&self, _event: &EventEnvelope) -> PlatformResult<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(PlatformError::internal("临时故障"))
            } else {
                Ok(())
            }
        }
    }

    #[derive(serde::Deserialize)]
    #[allow(dead_code)]
    struct AmountPayload {
        amount: i64,
    }

    /// 负载必须带 `amount` 的处理器
    #[derive(Default)]
    struct StrictHandler {
        calls: AtomicU32,
    }

    #[async_trait]
    impl EventHandler for StrictHandler {
        fn name(&self) -> &'static str {
            "strict"
        }

        fn bindings(&self) -> Vec<Binding> {
            vec![Binding::new(USAGE_EXCHANGE, "usage.#")]
        }

        async fn handle(&self, event: &EventEnvelope) -> PlatformResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _payload: AmountPayload = event.payload_as()?;
            Ok(())
        }
    }

    fn message(event: &EventEnvelope, retry_count: u32) -> IncomingMessage {
        IncomingMessage {
            routing_key: event.event_type.clone(),
            body: serde_json::to_vec(event).unwrap(),
            retry_count,
        }
    }

    fn consumer(handler: Arc<FlakyHandler>, store: Arc<InMemoryIdempotencyStore>, max_retries: u32) -> QueueConsumer {
        QueueConsumer::new(handler, store, RetryPolicy::new(max_retries))
    }

    fn usage_event() -> EventEnvelope {
        EventEnvelope::new(
            routing::USAGE_MESSAGE_ADDED,
            Some(Uuid::new_v4()),
            json!({ "amount": 1 }),
        )
    }

    #[test]
    fn test_topic_matching() {
        assert!(topic_matches("usage.#", "usage.message.added"));
        assert!(topic_matches("usage.#", "usage"));
        assert!(topic_matches("usage.*.added", "usage.document.added"));
        assert!(!topic_matches("usage.*", "usage.document.added"));
        assert!(topic_matches("#", "anything.at.all"));
        assert!(!topic_matches("chat.message.created", "chat.answer.generated"));
    }

    #[test]
    fn test_binding_requires_same_exchange() {
        let binding = Binding::new(USAGE_EXCHANGE, "usage.#");
        assert!(binding.matches(USAGE_EXCHANGE, "usage.document.removed"));
        assert!(!binding.matches(BILLING_EXCHANGE, "usage.document.removed"));
    }

    #[test]
    fn test_exchange_for_routing_keys() {
        assert_eq!(exchange_for(routing::PAYMENT_SUCCEEDED), Some(BILLING_EXCHANGE));
        assert_eq!(exchange_for(routing::USAGE_DOCUMENT_ADDED), Some(USAGE_EXCHANGE));
        assert_eq!(exchange_for("unknown.event"), None);
    }

    #[test]
    fn test_retry_policy() {
        let policy = RetryPolicy::new(3);
        assert_eq!(policy.next_attempt(0), Some(1));
        assert_eq!(policy.next_attempt(2), Some(3));
        assert_eq!(policy.next_attempt(3), None);

        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_secs(1));
        assert_eq!(policy.backoff(20), Duration::from_secs(30));

        for attempt in 1..=3 {
            let base = policy.backoff(attempt);
            let delay = policy.jittered_backoff(attempt);
            assert!(delay >= base && delay <= base + base / 4);
        }
    }

    #[test]
    fn test_retry_count_header() {
        assert_eq!(retry_count_from(None), 0);

        let mut headers = FieldTable::default();
        headers.insert(ShortString::from(RETRY_COUNT_HEADER), AMQPValue::LongLongInt(2));
        assert_eq!(retry_count_from(Some(&headers)), 2);

        let mut negative = FieldTable::default();
        negative.insert(ShortString::from(RETRY_COUNT_HEADER), AMQPValue::LongInt(-4));
        assert_eq!(retry_count_from(Some(&negative)), 0);

        assert_eq!(dead_letter_queue("chatwise.usage"), "chatwise.usage.dead");
    }

    #[tokio::test]
    async fn test_successful_delivery_is_acked_once() {
        let handler = Arc::new(FlakyHandler::new(0));
        let store = Arc::new(InMemoryIdempotencyStore::new());
        let consumer = consumer(handler.clone(), store.clone(), 3);
        let event = usage_event();

        assert_eq!(consumer.process(&message(&event, 0)).await, DeliveryOutcome::Ack);
        assert_eq!(consumer.process(&message(&event, 0)).await, DeliveryOutcome::Duplicate);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert!(store.contains(&format!("flaky:{}", event.dedup_key())).await);
    }

    #[tokio::test]
    async fn test_failure_releases_key_and_retries() {
        let handler = Arc::new(FlakyHandler::new(1));
        let store = Arc::new(InMemoryIdempotencyStore::new());
        let consumer = consumer(handler.clone(), store.clone(), 3);
        let event = usage_event();

        assert_eq!(
            consumer.process(&message(&event, 0)).await,
            DeliveryOutcome::Retry { attempt: 1 }
        );
        assert!(!store.contains(&format!("flaky:{}", event.dedup_key())).await);

        assert_eq!(consumer.process(&message(&event, 1)).await, DeliveryOutcome::Ack);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_dead_letter() {
        let handler = Arc::new(FlakyHandler::new(u32::MAX));
        let store = Arc::new(InMemoryIdempotencyStore::new());
        let consumer = consumer(handler, store, 2);

        let outcome = consumer.process(&message(&usage_event(), 2)).await;
        assert!(matches!(outcome, DeliveryOutcome::DeadLetter { .. }));
    }

    #[tokio::test]
    async fn test_undecodable_payload_dead_letters_without_retry() {
        let handler = Arc::new(StrictHandler::default());
        let store = Arc::new(InMemoryIdempotencyStore::new());
        let consumer = QueueConsumer::new(handler.clone(), store.clone(), RetryPolicy::new(5));
        let event = EventEnvelope::new(routing::USAGE_MESSAGE_ADDED, Some(Uuid::new_v4()), json!({ "count": "x" }));

        let outcome = consumer.process(&message(&event, 0)).await;
        assert!(matches!(outcome, DeliveryOutcome::DeadLetter { .. }));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert!(!store.contains(&format!("strict:{}", event.dedup_key())).await);

        assert_eq!(consumer.process(&message(&usage_event(), 0)).await, DeliveryOutcome::Ack);
    }

    #[tokio::test]
    async fn test_malformed_body_dead_letters_immediately() {
        let handler = Arc::new(FlakyHandler::new(0));
        let store = Arc::new(InMemoryIdempotencyStore::new());
        let consumer = consumer(handler.clone(), store, 5);

        let outcome = consumer
            .process(&IncomingMessage {
                routing_key: "usage.message.added".into(),
                body: b"not json".to_vec(),
                retry_count: 0,
            })
            .await;

        assert!(matches!(outcome, DeliveryOutcome::DeadLetter { .. }));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_idempotency_key_overrides_event_id() {
        let handler = Arc::new(FlakyHandler::new(0));
        let store = Arc::new(InMemoryIdempotencyStore::new());
        let consumer = consumer(handler.clone(), store, 3);

        let first = usage_event().with_idempotency_key("msg-42");
        let second = usage_event().with_idempotency_key("msg-42");

        assert_eq!(consumer.process(&message(&first, 0)).await, DeliveryOutcome::Ack);
        assert_eq!(consumer.process(&message(&second, 0)).await, DeliveryOutcome::Duplicate);
    }

    #[tokio::test]
    async fn test_in_memory_broker_records_messages() {
        let broker = InMemoryBroker::new();
        let event = usage_event();

        publish_event(&broker, routing::USAGE_MESSAGE_ADDED, &event).await.unwrap();
        broker.send_to_queue("email.send", &event).await.unwrap();

        let published = broker.messages_for(routing::USAGE_MESSAGE_ADDED);
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].exchange, USAGE_EXCHANGE);

        let queued = broker.messages_for("email.send");
        assert_eq!(queued[0].exchange, "");

        assert!(publish_event(&broker, "bogus.key", &event).await.is_err());
        broker.clear();
        assert!(broker.messages().is_empty());
    }

    #[tokio::test]
    async fn test_discard_broker_keeps_only_a_count() {
        let broker = DiscardBroker::new();
        let event = usage_event();

        for _ in 0..1500 {
            publish_event(&broker, routing::USAGE_MESSAGE_ADDED, &event).await.unwrap();
        }
        broker.send_to_queue("email.send", &event).await.unwrap();

        assert_eq!(broker.discarded(), 1501);
        assert_eq!(std::mem::size_of_val(&broker), std::mem::size_of::<u64>());
        assert!(!broker.is_healthy().await);
        assert!(publish_event(&broker, "bogus.key", &event).await.is_err());
        assert_eq!(broker.discarded(), 1501);
    }

    #[tokio::test]
    async fn test_disabled_broker_discards_events() {
        let config = crate::config::BrokerConfig {
            enabled: false,
            url: "amqp://localhost:5672".into(),
            prefetch: 10,
            max_retries: 3,
            consumer_tag_prefix: "chatwise".into(),
        };

        let messaging = Messaging::connect(&config).await;
        assert_eq!(messaging.broker.kind(), "discard");
        assert!(messaging.amqp.is_none());

        let tasks = messaging
            .spawn_consumers(
                &config,
                vec![Arc::new(FlakyHandler::new(0))],
                Arc::new(InMemoryIdempotencyStore::new()),
                tokio_util::sync::CancellationToken::new(),
            )
            .await;
        assert!(tasks.is_empty());
    }
}
