// 令牌缓存
// 以令牌末尾片段为键缓存已验证的声明，避免重复验签

use crate::services::auth::Claims;
use chrono::Utc;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

struct CacheEntry {
    claims: Claims,
    inserted_at: Instant,
}

/// 固定容量的令牌缓存
///
/// 条目在超过 TTL 或令牌本身过期后失效；写满时淘汰最早插入的条目。
pub struct TokenCache {
    capacity: usize,
    ttl: Duration,
    key_len: usize,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl TokenCache {
    pub fn new(capacity: usize, ttl: Duration, key_len: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            key_len: key_len.max(1),
            entries: Mutex::new(HashMap::with_capacity(capacity)),
        }
    }

    /// 缓存键：令牌的最后 `key_len` 个字符（签名段）
    pub fn cache_key(&self, token: &str) -> String {
        let len = token.chars().count();
        token.chars().skip(len.saturating_sub(self.key_len)).collect()
    }

    pub async fn get(&self, token: &str) -> Option<Claims> {
        let key = self.cache_key(token);
        let mut entries = self.entries.lock().await;

        let entry = entries.get(&key)?;
        let stale = entry.inserted_at.elapsed() >= self.ttl;
        let expired = entry.claims.exp <= Utc::now().timestamp();

        if stale || expired {
            entries.remove(&key);
            debug!(stale, expired, "令牌缓存条目失效");
            return None;
        }

        Some(entry.claims.clone())
    }

    pub async fn insert(&self, token: &str, claims: Claims) {
        let key = self.cache_key(token);
        let mut entries = self.entries.lock().await;

        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }

        entries.insert(
            key,
            CacheEntry {
                claims,
                inserted_at: Instant::now(),
            },
        );
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }
}
