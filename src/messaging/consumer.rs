// 队列消费者
// 解码 → 幂等占用 → 处理 → 确认 / 重试 / 死信

use crate::errors::PlatformResult;
use crate::messaging::idempotency::IdempotencyStore;
use crate::messaging::topics::Binding;
use async_trait::async_trait;
use chatwise_common::EventEnvelope;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// 事件处理器
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// 处理器名称，同时作为幂等键前缀
    fn name(&self) -> &'static str;

    /// 消费的队列
    fn queue(&self) -> String {
        format!("chatwise.{}", self.name())
    }

    /// 队列绑定；工作队列返回空
    fn bindings(&self) -> Vec<Binding>;

    async fn handle(&self, event: &EventEnvelope) -> PlatformResult<()>;
}

/// 重试策略
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }

    /// 下一次重试的计数；达到上限时返回 None
    pub fn next_attempt(&self, retry_count: u32) -> Option<u32> {
        (retry_count < self.max_retries).then_some(retry_count + 1)
    }

    /// 重新投递前的退避时间
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// 带随机抖动的退避时间，抖动至多为基础值的四分之一
    pub fn jittered_backoff(&self, attempt: u32) -> Duration {
        let delay = self.backoff(attempt);
        let spread = delay.as_millis() as u64 / 4;
        if spread == 0 {
            return delay;
        }
        delay + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
    }
}

/// 收到的消息
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub routing_key: String,
    pub body: Vec<u8>,
    pub retry_count: u32,
}

/// 单条消息的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// 处理成功
    Ack,
    /// 已处理过，直接确认
    Duplicate,
    /// 带递增后的计数重新投递，然后确认原消息
    Retry { attempt: u32 },
    /// 拒绝且不重新入队（进入死信）
    DeadLetter { reason: String },
}

/// 队列消费者
pub struct QueueConsumer {
    handler: Arc<dyn EventHandler>,
    store: Arc<dyn IdempotencyStore>,
    policy: RetryPolicy,
}

impl QueueConsumer {
    pub fn new(handler: Arc<dyn EventHandler>, store: Arc<dyn IdempotencyStore>, policy: RetryPolicy) -> Self {
        Self { handler, store, policy }
    }

    pub fn handler(&self) -> &Arc<dyn EventHandler> {
        &self.handler
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// 处理一条消息
    #[instrument(skip(self, message), fields(handler = self.handler.name(), routing_key = %message.routing_key))]
    pub async fn process(&self, message: &IncomingMessage) -> DeliveryOutcome {
        let event: EventEnvelope = match serde_json::from_slice(&message.body) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "无法解码事件信封，转入死信");
                return DeliveryOutcome::DeadLetter {
                    reason: format!("无法解码事件: {}", e),
                };
            }
        };

        let key = format!("{}:{}", self.handler.name(), event.dedup_key());

        match self.store.claim(&key, self.handler.name()).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(event_id = %event.event_id, "重复事件，跳过");
                return DeliveryOutcome::Duplicate;
            }
            Err(e) => {
                error!(error = %e, "占用幂等键失败");
                return self.retry_or_dead_letter(message.retry_count, e.to_string());
            }
        }

        match self.handler.handle(&event).await {
            Ok(()) => {
                info!(event_id = %event.event_id, event_type = %event.event_type, "事件处理完成");
                DeliveryOutcome::Ack
            }
            Err(e) => {
                warn!(event_id = %event.event_id, error = %e, retry_count = message.retry_count, "事件处理失败");
                if let Err(release_err) = self.store.release(&key).await {
                    error!(error = %release_err, "释放幂等键失败");
                }
                if !e.is_retryable() {
                    error!(event_id = %event.event_id, error_code = e.error_code(), "错误不可重试，转入死信");
                    return DeliveryOutcome::DeadLetter { reason: e.to_string() };
                }
                self.retry_or_dead_letter(message.retry_count, e.to_string())
            }
        }
    }

    fn retry_or_dead_letter(&self, retry_count: u32, reason: String) -> DeliveryOutcome {
        match self.policy.next_attempt(retry_count) {
            Some(attempt) => DeliveryOutcome::Retry { attempt },
            None => {
                error!(retry_count, reason = %reason, "超过最大重试次数，转入死信");
                DeliveryOutcome::DeadLetter { reason }
            }
        }
    }
}
