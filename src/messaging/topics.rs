// 交换机、队列与路由键
// 所有跨服务事件的命名集中在这里

/// 租户生命周期事件
pub const TENANT_EXCHANGE: &str = "tenant.events";
/// 用量事件
pub const USAGE_EXCHANGE: &str = "usage.events";
/// 聊天事件
pub const CHAT_EXCHANGE: &str = "chat.events";
/// 计费事件
pub const BILLING_EXCHANGE: &str = "billing.events";
/// 工作流与摄取事件
pub const WORKFLOW_EXCHANGE: &str = "workflow.events";

/// 所有主题交换机
pub const EXCHANGES: &[&str] = &[
    TENANT_EXCHANGE,
    USAGE_EXCHANGE,
    CHAT_EXCHANGE,
    BILLING_EXCHANGE,
    WORKFLOW_EXCHANGE,
];

/// 死信交换机
pub const DEAD_LETTER_EXCHANGE: &str = "chatwise.dlx";

/// 邮件发送工作队列
pub const EMAIL_SEND_QUEUE: &str = "email.send";

/// 重试计数消息头
pub const RETRY_COUNT_HEADER: &str = "x-retry-count";

pub mod routing {
    pub const TENANT_CREATED: &str = "tenant.created";
    pub const USER_CREATED: &str = "user.created";

    pub const USAGE_MESSAGE_ADDED: &str = "usage.message.added";
    pub const USAGE_DOCUMENT_ADDED: &str = "usage.document.added";
    pub const USAGE_DOCUMENT_REMOVED: &str = "usage.document.removed";

    pub const CHAT_MESSAGE_CREATED: &str = "chat.message.created";
    pub const CHAT_ANSWER_GENERATED: &str = "chat.answer.generated";
    pub const CHAT_SESSION_CLOSED: &str = "chat.session.closed";

    pub const PAYMENT_SUCCEEDED: &str = "payment.succeeded";
    pub const INVOICE_GENERATED: &str = "invoice.generated";
    pub const SUBSCRIPTION_EXPIRED: &str = "subscription.expired";

    pub const INGESTION_REQUESTED: &str = "ingestion.requested";
}

/// 队列绑定：交换机 + 路由键（支持 `*`、`#` 通配）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub exchange: String,
    pub routing_key: String,
}

impl Binding {
    pub fn new(exchange: &str, routing_key: &str) -> Self {
        Self {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
        }
    }

    /// 按 AMQP 主题交换机规则匹配路由键
    pub fn matches(&self, exchange: &str, routing_key: &str) -> bool {
        self.exchange == exchange && topic_matches(&self.routing_key, routing_key)
    }
}

/// 主题匹配：`*` 匹配一个单词，`#` 匹配零个或多个单词
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    match_words(&pattern, &key)
}

fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    match (pattern.first(), key.first()) {
        (None, None) => true,
        (Some(&"#"), _) => {
            match_words(&pattern[1..], key) || (!key.is_empty() && match_words(pattern, &key[1..]))
        }
        (Some(&"*"), Some(_)) => match_words(&pattern[1..], &key[1..]),
        (Some(p), Some(k)) if p == k => match_words(&pattern[1..], &key[1..]),
        _ => false,
    }
}

/// 路由键所属的交换机
pub fn exchange_for(routing_key: &str) -> Option<&'static str> {
    let exchange = match routing_key.split('.').next()? {
        "tenant" | "user" => TENANT_EXCHANGE,
        "usage" => USAGE_EXCHANGE,
        "chat" => CHAT_EXCHANGE,
        "payment" | "invoice" | "subscription" => BILLING_EXCHANGE,
        "ingestion" | "workflow" => WORKFLOW_EXCHANGE,
        _ => return None,
    };
    Some(exchange)
}
