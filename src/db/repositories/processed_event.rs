// 已处理事件仓储实现

use crate::db::entities::{prelude::*, processed_event};
use crate::errors::PlatformError;
use chrono::{DateTime, Utc};
use sea_orm::*;

/// 已处理事件仓储
pub struct ProcessedEventRepository;

impl ProcessedEventRepository {
    /// 插入记录，已存在时不做任何事；返回是否新插入
    pub async fn try_insert<C: ConnectionTrait>(db: &C, id: &str, consumer: &str) -> Result<bool, PlatformError> {
        let result = db
            .execute(Statement::from_sql_and_values(
                DatabaseBackend::Postgres,
                r#"INSERT INTO processed_events (id, consumer, processed_at)
                   VALUES ($1, $2, NOW())
                   ON CONFLICT (id) DO NOTHING"#,
                [id.into(), consumer.into()],
            ))
            .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn delete<C: ConnectionTrait>(db: &C, id: &str) -> Result<(), PlatformError> {
        ProcessedEvent::delete_by_id(id.to_string()).exec(db).await?;
        Ok(())
    }

    pub async fn exists<C: ConnectionTrait>(db: &C, id: &str) -> Result<bool, PlatformError> {
        Ok(ProcessedEvent::find_by_id(id.to_string()).one(db).await?.is_some())
    }

    /// 清理早于给定时间的记录
    pub async fn purge_before<C: ConnectionTrait>(db: &C, before: DateTime<Utc>) -> Result<u64, PlatformError> {
        let result = ProcessedEvent::delete_many()
            .filter(processed_event::Column::ProcessedAt.lt(before))
            .exec(db)
            .await?;
        Ok(result.rows_affected)
    }
}
