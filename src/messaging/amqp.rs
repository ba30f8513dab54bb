// RabbitMQ 消息代理
// 持久化主题交换机、持久化 JSON 消息与带死信的消费队列

use crate::errors::PlatformResult;
use crate::messaging::broker::MessageBroker;
use crate::messaging::consumer::{DeliveryOutcome, IncomingMessage, QueueConsumer};
use crate::messaging::topics::{DEAD_LETTER_EXCHANGE, EXCHANGES, RETRY_COUNT_HEADER};
use async_trait::async_trait;
use chatwise_common::EventEnvelope;
use futures::StreamExt;
use lapin::{
    message::Delivery,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
        BasicRejectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable, LongString, ShortString},
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// 持久化投递模式
const PERSISTENT: u8 = 2;

/// RabbitMQ 代理
pub struct AmqpBroker {
    connection: Connection,
    channel: Channel,
    declared_queues: Mutex<HashSet<String>>,
}

impl AmqpBroker {
    /// 连接并声明所有主题交换机
    #[instrument(skip(url))]
    pub async fn connect(url: &str) -> PlatformResult<Self> {
        let connection = Connection::connect(url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;

        for exchange in EXCHANGES {
            channel
                .exchange_declare(
                    exchange,
                    ExchangeKind::Topic,
                    ExchangeDeclareOptions { durable: true, ..Default::default() },
                    FieldTable::default(),
                )
                .await?;
        }
        channel
            .exchange_declare(
                DEAD_LETTER_EXCHANGE,
                ExchangeKind::Direct,
                ExchangeDeclareOptions { durable: true, ..Default::default() },
                FieldTable::default(),
            )
            .await?;

        info!(exchanges = EXCHANGES.len(), "消息代理连接成功");
        Ok(Self {
            connection,
            channel,
            declared_queues: Mutex::new(HashSet::new()),
        })
    }

    /// 为消费者创建独立通道
    pub async fn create_channel(&self) -> PlatformResult<Channel> {
        Ok(self.connection.create_channel().await?)
    }

    async fn ensure_queue(&self, queue: &str) -> PlatformResult<()> {
        let mut declared = self.declared_queues.lock().await;
        if declared.contains(queue) {
            return Ok(());
        }
        declare_queue(&self.channel, queue).await?;
        declared.insert(queue.to_string());
        Ok(())
    }

    async fn send(&self, exchange: &str, routing_key: &str, event: &EventEnvelope, retry_count: u32) -> PlatformResult<()> {
        let payload = serde_json::to_vec(event)?;
        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &payload,
                message_properties(event, retry_count),
            )
            .await?
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MessageBroker for AmqpBroker {
    async fn publish(&self, exchange: &str, routing_key: &str, event: &EventEnvelope) -> PlatformResult<()> {
        self.send(exchange, routing_key, event, 0).await
    }

    async fn send_to_queue(&self, queue: &str, event: &EventEnvelope) -> PlatformResult<()> {
        self.ensure_queue(queue).await?;
        self.send("", queue, event, 0).await
    }

    fn kind(&self) -> &'static str {
        "amqp"
    }

    async fn is_healthy(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }
}

fn message_properties(event: &EventEnvelope, retry_count: u32) -> BasicProperties {
    let mut headers = FieldTable::default();
    headers.insert(
        ShortString::from(RETRY_COUNT_HEADER),
        AMQPValue::LongLongInt(retry_count as i64),
    );

    BasicProperties::default()
        .with_content_type(ShortString::from("application/json"))
        .with_delivery_mode(PERSISTENT)
        .with_message_id(ShortString::from(event.event_id.to_string()))
        .with_kind(ShortString::from(event.event_type.clone()))
        .with_headers(headers)
}

/// 消费队列参数：拒绝的消息进入 `<queue>.dead`
fn queue_arguments(queue: &str) -> FieldTable {
    let mut arguments = FieldTable::default();
    arguments.insert(
        ShortString::from("x-dead-letter-exchange"),
        AMQPValue::LongString(LongString::from(DEAD_LETTER_EXCHANGE)),
    );
    arguments.insert(
        ShortString::from("x-dead-letter-routing-key"),
        AMQPValue::LongString(LongString::from(dead_letter_queue(queue))),
    );
    arguments
}

pub fn dead_letter_queue(queue: &str) -> String {
    format!("{}.dead", queue)
}

/// 声明消费队列及其死信队列
async fn declare_queue(channel: &Channel, queue: &str) -> PlatformResult<()> {
    let durable = QueueDeclareOptions { durable: true, ..Default::default() };
    let dead = dead_letter_queue(queue);

    channel.queue_declare(&dead, durable, FieldTable::default()).await?;
    channel
        .queue_bind(&dead, DEAD_LETTER_EXCHANGE, &dead, QueueBindOptions::default(), FieldTable::default())
        .await?;
    channel.queue_declare(queue, durable, queue_arguments(queue)).await?;
    Ok(())
}

/// 从消息头读取重试计数
pub fn retry_count_from(headers: Option<&FieldTable>) -> u32 {
    let value = headers.and_then(|h| h.inner().get(RETRY_COUNT_HEADER));
    match value {
        Some(AMQPValue::LongLongInt(v)) => (*v).max(0) as u32,
        Some(AMQPValue::LongInt(v)) => (*v).max(0) as u32,
        Some(AMQPValue::LongUInt(v)) => *v,
        Some(AMQPValue::ShortInt(v)) => (*v).max(0) as u32,
        Some(AMQPValue::ShortShortInt(v)) => (*v).max(0) as u32,
        _ => 0,
    }
}

/// 运行一个队列消费者，直到取消或通道关闭
#[instrument(skip(channel, consumer, shutdown), fields(handler = consumer.handler().name()))]
pub async fn run_consumer(
    channel: Channel,
    consumer: Arc<QueueConsumer>,
    prefetch: u16,
    consumer_tag: String,
    shutdown: CancellationToken,
) -> PlatformResult<()> {
    let handler = consumer.handler().clone();
    let queue = handler.queue();

    declare_queue(&channel, &queue).await?;
    for binding in handler.bindings() {
        channel
            .queue_bind(
                &queue,
                &binding.exchange,
                &binding.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
    }

    channel.basic_qos(prefetch, BasicQosOptions::default()).await?;
    let mut deliveries = channel
        .basic_consume(&queue, &consumer_tag, BasicConsumeOptions::default(), FieldTable::default())
        .await?;

    info!(queue = %queue, prefetch, "队列消费者已启动");

    loop {
        let delivery = tokio::select! {
            _ = shutdown.cancelled() => {
                info!(queue = %queue, "队列消费者收到停止信号");
                break;
            }
            next = deliveries.next() => match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => {
                    error!(queue = %queue, error = %e, "读取消息失败");
                    return Err(e.into());
                }
                None => {
                    warn!(queue = %queue, "消费流已关闭");
                    break;
                }
            }
        };

        if let Err(e) = settle(&channel, &consumer, &queue, delivery).await {
            error!(queue = %queue, error = %e, "确认消息失败");
        }
    }

    Ok(())
}

/// 退避后重新投递回本队列再确认原消息；在独立任务中等待，不阻塞消费循环
fn schedule_redelivery(channel: Channel, queue: String, delivery: Delivery, attempt: u32, delay: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;

        let mut properties = delivery.properties.clone();
        let mut headers = properties.headers().clone().unwrap_or_default();
        headers.insert(ShortString::from(RETRY_COUNT_HEADER), AMQPValue::LongLongInt(attempt as i64));
        properties = properties.with_headers(headers);

        // 直接投递回本队列，避免其他绑定了相同路由键的消费者重复收到
        let republished = match channel
            .basic_publish("", &queue, BasicPublishOptions::default(), &delivery.data, properties)
            .await
        {
            Ok(confirm) => confirm.await.map(|_| ()),
            Err(e) => Err(e),
        };

        let settled = match republished {
            Ok(()) => delivery.ack(BasicAckOptions::default()).await,
            // 重新投递失败时把原消息放回队列
            Err(e) => {
                error!(queue = %queue, attempt, error = %e, "重新投递失败，原消息重新入队");
                delivery.nack(BasicNackOptions { requeue: true, ..Default::default() }).await
            }
        };
        match settled {
            Ok(()) => warn!(queue = %queue, attempt, "消息已重新投递"),
            Err(e) => error!(queue = %queue, error = %e, "确认消息失败"),
        }
    });
}

async fn settle(channel: &Channel, consumer: &QueueConsumer, queue: &str, delivery: Delivery) -> PlatformResult<()> {
    let message = IncomingMessage {
        routing_key: delivery.routing_key.to_string(),
        retry_count: retry_count_from(delivery.properties.headers().as_ref()),
        body: delivery.data.clone(),
    };

    match consumer.process(&message).await {
        DeliveryOutcome::Ack | DeliveryOutcome::Duplicate => {
            delivery.ack(BasicAckOptions::default()).await?;
        }
        DeliveryOutcome::Retry { attempt } => {
            let delay = consumer.policy().jittered_backoff(attempt);
            schedule_redelivery(channel.clone(), queue.to_string(), delivery, attempt, delay);
        }
        DeliveryOutcome::DeadLetter { reason } => {
            delivery.reject(BasicRejectOptions { requeue: false }).await?;
            warn!(queue = %queue, reason = %reason, "消息已转入死信");
        }
    }
    Ok(())
}
