// 跨服务事件信封
// 所有通过消息队列传递的事件都使用统一的 JSON 信封

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

/// 事件信封
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope {
    /// 事件 ID
    pub event_id: Uuid,
    /// 事件类型（与路由键一致，例如 `user.created`）
    pub event_type: String,
    /// 所属租户
    #[serde(default)]
    pub tenant_id: Option<Uuid>,
    /// 发生时间
    pub occurred_at: DateTime<Utc>,
    /// 幂等键（同一业务事件重复投递时保持不变）
    #[serde(default)]
    pub idempotency_key: Option<String>,
    /// 事件负载
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// 创建新的事件
    pub fn new(event_type: impl Into<String>, tenant_id: Option<Uuid>, payload: serde_json::Value) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            tenant_id,
            occurred_at: Utc::now(),
            idempotency_key: None,
            payload,
        }
    }

    /// 设置幂等键
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// 去重使用的键：优先使用幂等键，否则使用事件 ID
    pub fn dedup_key(&self) -> String {
        self.idempotency_key
            .clone()
            .unwrap_or_else(|| self.event_id.to_string())
    }

    /// 将负载反序列化为具体类型
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_key_prefers_idempotency_key() {
        let event = EventEnvelope::new("usage.document.removed", None, serde_json::json!({}));
        assert_eq!(event.dedup_key(), event.event_id.to_string());

        let event = event.with_idempotency_key("doc-42:removed");
        assert_eq!(event.dedup_key(), "doc-42:removed");
    }

    #[test]
    fn test_missing_optional_fields_deserialize() {
        let raw = r#"{
            "event_id": "7d0f5a52-3b59-4a8f-9c54-6d1a2f0e9b11",
            "event_type": "user.created",
            "occurred_at": "2024-05-01T10:00:00Z"
        }"#;
        let event: EventEnvelope = serde_json::from_str(raw).unwrap();
        assert!(event.tenant_id.is_none());
        assert!(event.idempotency_key.is_none());
        assert!(event.payload.is_null());
    }
}
