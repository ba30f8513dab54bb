// 数据库迁移模块
// 线性 SQL 迁移，记录在 schema_migrations 表中并校验 SHA-256

use crate::errors::PlatformError;
use sea_orm::{
    ConnectionTrait, DatabaseBackend, DatabaseConnection, DatabaseTransaction, Statement,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::{info, instrument, warn};
use std::sync::Arc;

pub mod migrations;
pub mod seed_data;

pub use migrations::*;
pub use seed_data::*;

/// 迁移定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Migration {
    pub version: String,
    pub name: String,
    pub description: String,
    pub up_sql: String,
    pub down_sql: String,
}

impl Migration {
    /// up 与 down 脚本的校验和
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.up_sql.as_bytes());
        hasher.update(self.down_sql.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// 迁移状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationStatus {
    pub version: String,
    pub name: String,
    pub applied_at: Option<chrono::DateTime<chrono::Utc>>,
    pub is_applied: bool,
    pub checksum: String,
    pub checksum_mismatch: bool,
}

/// 迁移管理器
pub struct MigrationManager {
    db: Arc<DatabaseConnection>,
}

impl MigrationManager {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// 创建迁移记录表
    #[instrument(skip(self))]
    pub async fn init(&self) -> Result<(), PlatformError> {
        let create_migrations_table = r#"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version VARCHAR(64) PRIMARY KEY,
                name VARCHAR(255) NOT NULL,
                description TEXT,
                checksum VARCHAR(64) NOT NULL,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
                execution_time_ms INTEGER NOT NULL DEFAULT 0
            )
        "#;

        self.db
            .execute(Statement::from_string(
                DatabaseBackend::Postgres,
                create_migrations_table.to_string(),
            ))
            .await?;

        info!("迁移系统初始化完成");
        Ok(())
    }

    /// 获取所有可用的迁移（按版本排序）
    pub fn get_available_migrations(&self) -> Vec<Migration> {
        migrations::get_all_migrations()
    }

    /// 获取已应用的迁移
    pub async fn get_applied_migrations(&self) -> Result<Vec<MigrationStatus>, PlatformError> {
        let rows = self
            .db
            .query_all(Statement::from_string(
                DatabaseBackend::Postgres,
                "SELECT version, name, applied_at, checksum FROM schema_migrations ORDER BY version"
                    .to_string(),
            ))
            .await?;

        let mut applied = Vec::with_capacity(rows.len());
        for row in rows {
            applied.push(MigrationStatus {
                version: row.try_get("", "version")?,
                name: row.try_get("", "name")?,
                applied_at: Some(row.try_get("", "applied_at")?),
                is_applied: true,
                checksum: row.try_get("", "checksum")?,
                checksum_mismatch: false,
            });
        }

        Ok(applied)
    }

    /// 检查迁移状态
    #[instrument(skip(self))]
    pub async fn check_status(&self) -> Result<Vec<MigrationStatus>, PlatformError> {
        let applied: HashMap<String, MigrationStatus> = self
            .get_applied_migrations()
            .await?
            .into_iter()
            .map(|m| (m.version.clone(), m))
            .collect();

        Ok(merge_status(self.get_available_migrations(), &applied))
    }

    /// 应用待处理的迁移，返回本次应用的版本
    #[instrument(skip(self))]
    pub async fn migrate(&self) -> Result<Vec<String>, PlatformError> {
        self.init().await?;

        let status = self.check_status().await?;
        let pending: Vec<&MigrationStatus> = status.iter().filter(|s| !s.is_applied).collect();
        let available = self.get_available_migrations();
        let mut applied = Vec::new();

        for migration_status in pending {
            let migration = available
                .iter()
                .find(|m| m.version == migration_status.version)
                .ok_or_else(|| {
                    PlatformError::internal(format!("找不到迁移: {}", migration_status.version))
                })?;

            self.apply_migration(migration).await?;
            applied.push(migration.version.clone());
        }

        if applied.is_empty() {
            info!("没有待处理的迁移");
        } else {
            info!(count = applied.len(), "迁移应用完成");
        }

        Ok(applied)
    }

    /// 在事务中应用单个迁移
    #[instrument(skip(self, migration), fields(version = %migration.version))]
    async fn apply_migration(&self, migration: &Migration) -> Result<(), PlatformError> {
        info!(name = %migration.name, "应用迁移");
        let start_time = std::time::Instant::now();

        let txn = self.db.begin().await?;

        if let Err(e) = execute_script(&txn, &migration.up_sql).await {
            txn.rollback().await?;
            return Err(PlatformError::database(format!(
                "迁移 {} 执行失败: {}",
                migration.version, e
            )));
        }

        let execution_time = start_time.elapsed().as_millis() as i32;
        txn.execute(Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            r#"INSERT INTO schema_migrations (version, name, description, checksum, execution_time_ms)
               VALUES ($1, $2, $3, $4, $5)"#,
            [
                migration.version.clone().into(),
                migration.name.clone().into(),
                migration.description.clone().into(),
                migration.checksum().into(),
                execution_time.into(),
            ],
        ))
        .await?;

        txn.commit().await?;

        info!(execution_time_ms = execution_time, "迁移应用成功");
        Ok(())
    }

    /// 回滚指定版本
    #[instrument(skip(self))]
    pub async fn rollback(&self, version: &str) -> Result<(), PlatformError> {
        warn!(version = %version, "回滚数据库迁移");

        let migration = self
            .get_available_migrations()
            .into_iter()
            .find(|m| m.version == version)
            .ok_or_else(|| PlatformError::not_found(format!("迁移 {}", version)))?;

        let txn = self.db.begin().await?;

        if let Err(e) = execute_script(&txn, &migration.down_sql).await {
            txn.rollback().await?;
            return Err(PlatformError::database(format!("迁移 {} 回滚失败: {}", version, e)));
        }

        txn.execute(Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            "DELETE FROM schema_migrations WHERE version = $1",
            [version.into()],
        ))
        .await?;

        txn.commit().await?;

        info!(version = %version, "迁移回滚完成");
        Ok(())
    }
}

/// 将可用迁移与已应用记录合并
pub fn merge_status(
    available: Vec<Migration>,
    applied: &HashMap<String, MigrationStatus>,
) -> Vec<MigrationStatus> {
    available
        .into_iter()
        .map(|migration| {
            let checksum = migration.checksum();
            match applied.get(&migration.version) {
                Some(record) => {
                    let mismatch = record.checksum != checksum;
                    if mismatch {
                        warn!(version = %migration.version, "迁移校验和不匹配，可能已被修改");
                    }
                    MigrationStatus {
                        checksum_mismatch: mismatch,
                        ..record.clone()
                    }
                }
                None => MigrationStatus {
                    version: migration.version,
                    name: migration.name,
                    applied_at: None,
                    is_applied: false,
                    checksum,
                    checksum_mismatch: false,
                },
            }
        })
        .collect()
}

/// 按分号拆分脚本
pub fn split_statements(sql: &str) -> Vec<&str> {
    sql.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

async fn execute_script(txn: &DatabaseTransaction, sql: &str) -> Result<(), PlatformError> {
    for statement in split_statements(sql) {
        txn.execute(Statement::from_string(
            DatabaseBackend::Postgres,
            statement.to_string(),
        ))
        .await?;
    }
    Ok(())
}
