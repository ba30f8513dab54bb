// 消费者幂等存储
// 先占用去重键再处理，处理失败时释放

use crate::db::ProcessedEventRepository;
use crate::errors::PlatformResult;
use async_trait::async_trait;
use sea_orm::DatabaseConnection;
use std::collections::HashSet;
use tokio::sync::Mutex;
use std::sync::Arc;

/// 幂等存储
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// 占用去重键；已被占用时返回 false
    async fn claim(&self, key: &str, consumer: &str) -> PlatformResult<bool>;

    /// 释放去重键，使消息可以被重新处理
    async fn release(&self, key: &str) -> PlatformResult<()>;
}

/// 基于 processed_events 表的实现
pub struct DbIdempotencyStore {
    db: Arc<DatabaseConnection>,
}

impl DbIdempotencyStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl IdempotencyStore for DbIdempotencyStore {
    async fn claim(&self, key: &str, consumer: &str) -> PlatformResult<bool> {
        ProcessedEventRepository::try_insert(self.db.as_ref(), key, consumer).await
    }

    async fn release(&self, key: &str) -> PlatformResult<()> {
        ProcessedEventRepository::delete(self.db.as_ref(), key).await
    }
}

/// 内存实现
#[derive(Default)]
pub struct InMemoryIdempotencyStore {
    keys: Mutex<HashSet<String>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.keys.lock().await.contains(key)
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn claim(&self, key: &str, _consumer: &str) -> PlatformResult<bool> {
        Ok(self.keys.lock().await.insert(key.to_string()))
    }

    async fn release(&self, key: &str) -> PlatformResult<()> {
        self.keys.lock().await.remove(key);
        Ok(())
    }
}
