// 消息代理抽象
// 发布事件到主题交换机或直接投递到工作队列

use crate::errors::{PlatformError, PlatformResult};
use crate::messaging::topics::exchange_for;
use async_trait::async_trait;
use chatwise_common::EventEnvelope;
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(test)]
use std::sync::Mutex;
use tracing::{debug, warn};

/// 消息代理
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// 发布事件到主题交换机
    async fn publish(&self, exchange: &str, routing_key: &str, event: &EventEnvelope) -> PlatformResult<()>;

    /// 直接投递到工作队列
    async fn send_to_queue(&self, queue: &str, event: &EventEnvelope) -> PlatformResult<()>;

    /// 代理类型名称（健康检查用）
    fn kind(&self) -> &'static str;

    async fn is_healthy(&self) -> bool;
}

/// 已发布的消息
#[cfg(test)]
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    /// 交换机；直接投递队列时为空
    pub exchange: String,
    /// 路由键或队列名
    pub routing_key: String,
    pub event: EventEnvelope,
}

/// 丢弃代理：消息代理不可用时记录日志后丢弃事件，只保留计数
#[derive(Debug, Default)]
pub struct DiscardBroker {
    discarded: AtomicU64,
}

impl DiscardBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已丢弃的事件数
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    fn discard(&self, target: &str, event: &EventEnvelope) {
        let total = self.discarded.fetch_add(1, Ordering::Relaxed) + 1;
        // 首条与每千条告警一次，其余降为 debug
        if total == 1 || total % 1000 == 0 {
            warn!(target_name = target, event_type = %event.event_type, discarded = total, "消息代理不可用，事件已丢弃");
        } else {
            debug!(target_name = target, event_id = %event.event_id, "事件已丢弃");
        }
    }
}

#[async_trait]
impl MessageBroker for DiscardBroker {
    async fn publish(&self, _exchange: &str, routing_key: &str, event: &EventEnvelope) -> PlatformResult<()> {
        self.discard(routing_key, event);
        Ok(())
    }

    async fn send_to_queue(&self, queue: &str, event: &EventEnvelope) -> PlatformResult<()> {
        self.discard(queue, event);
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "discard"
    }

    async fn is_healthy(&self) -> bool {
        false
    }
}

/// 内存代理：记录所有消息，供测试断言
#[cfg(test)]
#[derive(Debug, Default)]
pub struct InMemoryBroker {
    messages: Mutex<Vec<PublishedMessage>>,
}

#[cfg(test)]
impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 所有已记录的消息
    pub fn messages(&self) -> Vec<PublishedMessage> {
        self.messages.lock().map(|m| m.clone()).unwrap_or_default()
    }

    /// 某个路由键下的消息
    pub fn messages_for(&self, routing_key: &str) -> Vec<PublishedMessage> {
        self.messages()
            .into_iter()
            .filter(|m| m.routing_key == routing_key)
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.clear();
        }
    }

    fn record(&self, exchange: &str, routing_key: &str, event: &EventEnvelope) {
        debug!(exchange, routing_key, event_id = %event.event_id, "内存代理记录消息");
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(PublishedMessage {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                event: event.clone(),
            });
        }
    }
}

#[cfg(test)]
#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn publish(&self, exchange: &str, routing_key: &str, event: &EventEnvelope) -> PlatformResult<()> {
        self.record(exchange, routing_key, event);
        Ok(())
    }

    async fn send_to_queue(&self, queue: &str, event: &EventEnvelope) -> PlatformResult<()> {
        self.record("", queue, event);
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "in_memory"
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}

/// 按路由键前缀选择交换机并发布
pub async fn publish_event(broker: &dyn MessageBroker, routing_key: &str, event: &EventEnvelope) -> PlatformResult<()> {
    let exchange = exchange_for(routing_key)
        .ok_or_else(|| PlatformError::broker(format!("未知的路由键: {}", routing_key)))?;
    broker.publish(exchange, routing_key, event).await
}
