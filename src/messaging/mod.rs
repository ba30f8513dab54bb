// 消息模块
// 事件发布、队列消费、重试与死信

pub mod amqp;
pub mod broker;
pub mod consumer;
pub mod idempotency;
pub mod topics;

#[cfg(test)]
mod tests;

pub use amqp::AmqpBroker;
pub use broker::{publish_event, DiscardBroker, MessageBroker};
#[cfg(test)]
pub use broker::{InMemoryBroker, PublishedMessage};
pub use consumer::{DeliveryOutcome, EventHandler, IncomingMessage, QueueConsumer, RetryPolicy};
pub use idempotency::{DbIdempotencyStore, IdempotencyStore, InMemoryIdempotencyStore};
pub use topics::{routing, Binding};

use crate::config::BrokerConfig;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 已建立的消息代理
pub struct Messaging {
    /// 发布端
    pub broker: Arc<dyn MessageBroker>,
    /// RabbitMQ 连接；降级运行时为 None
    pub amqp: Option<Arc<AmqpBroker>>,
}

impl Messaging {
    /// 连接 RabbitMQ；禁用或连接失败时降级为丢弃代理
    pub async fn connect(config: &BrokerConfig) -> Self {
        if !config.enabled {
            info!("消息代理已禁用，事件将被丢弃");
            return Self::detached();
        }

        match AmqpBroker::connect(&config.url).await {
            Ok(broker) => {
                let broker = Arc::new(broker);
                Self {
                    broker: broker.clone(),
                    amqp: Some(broker),
                }
            }
            Err(e) => {
                warn!(error = %e, "无法连接消息代理，降级运行，事件将被丢弃");
                Self::detached()
            }
        }
    }

    /// 不连接消息代理
    pub fn detached() -> Self {
        Self {
            broker: Arc::new(DiscardBroker::new()),
            amqp: None,
        }
    }

    /// 为每个处理器启动一个消费任务
    pub async fn spawn_consumers(
        &self,
        config: &BrokerConfig,
        handlers: Vec<Arc<dyn EventHandler>>,
        store: Arc<dyn IdempotencyStore>,
        shutdown: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        let Some(connection) = &self.amqp else {
            if !handlers.is_empty() {
                warn!(handlers = handlers.len(), "未连接消息代理，跳过消费者启动");
            }
            return Vec::new();
        };

        let policy = RetryPolicy::new(config.max_retries);
        let mut tasks = Vec::with_capacity(handlers.len());

        for handler in handlers {
            let name = handler.name();
            let channel = match connection.create_channel().await {
                Ok(channel) => channel,
                Err(e) => {
                    error!(handler = name, error = %e, "创建消费通道失败");
                    continue;
                }
            };

            let consumer = Arc::new(QueueConsumer::new(handler, store.clone(), policy));
            let tag = format!("{}-{}", config.consumer_tag_prefix, name);
            let prefetch = config.prefetch;
            let token = shutdown.clone();

            tasks.push(tokio::spawn(async move {
                if let Err(e) = amqp::run_consumer(channel, consumer, prefetch, tag, token).await {
                    error!(handler = name, error = %e, "队列消费者异常退出");
                }
            }));
        }

        info!(consumers = tasks.len(), "消息消费者已启动");
        tasks
    }
}
