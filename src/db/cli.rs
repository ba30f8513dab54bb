// 数据库管理 CLI
// 迁移、状态、回滚与种子数据命令

use crate::config::AppConfig;
use crate::db::migrations::{MigrationManager, SeedDataManager};
use crate::db::DatabaseManager;
use crate::errors::PlatformError;
use sea_orm::DatabaseConnection;
use tracing::info;
use std::sync::Arc;

/// CLI 命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    /// 应用待处理的迁移
    Migrate,
    /// 查看迁移状态
    Status,
    /// 回滚指定版本
    Rollback { version: String },
    /// 安装默认套餐
    Seed,
}

/// CLI 执行器
pub struct CliExecutor {
    db: Arc<DatabaseConnection>,
    config: AppConfig,
}

impl CliExecutor {
    pub async fn new(config: AppConfig) -> Result<Self, PlatformError> {
        let manager = DatabaseManager::connect(config.database.clone()).await?;
        Ok(Self {
            db: manager.get_connection().clone(),
            config,
        })
    }

    /// 执行 CLI 命令
    pub async fn execute(&self, command: CliCommand) -> Result<(), PlatformError> {
        let manager = MigrationManager::new(self.db.clone());

        match command {
            CliCommand::Migrate => {
                let applied = manager.migrate().await?;
                if applied.is_empty() {
                    println!("✅ 没有待应用的迁移");
                } else {
                    println!("✅ 成功应用 {} 个迁移:", applied.len());
                    for version in applied {
                        println!("  - {}", version);
                    }
                }
            }
            CliCommand::Status => {
                manager.init().await?;
                let status = manager.check_status().await?;
                println!("{:<20} {:<42} {:<10} {:<25}", "版本", "名称", "状态", "应用时间");
                println!("{}", "-".repeat(97));
                for item in status {
                    let state = match (item.is_applied, item.checksum_mismatch) {
                        (true, true) => "已修改",
                        (true, false) => "已应用",
                        (false, _) => "待应用",
                    };
                    let applied_at = item
                        .applied_at
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!("{:<20} {:<42} {:<10} {:<25}", item.version, item.name, state, applied_at);
                }
            }
            CliCommand::Rollback { version } => {
                manager.rollback(&version).await?;
                println!("✅ 迁移 {} 回滚完成", version);
            }
            CliCommand::Seed => {
                let seeder = SeedDataManager::new(self.db.clone(), self.config.billing.currency.clone());
                let created = seeder.seed_all().await?;
                println!("✅ 新建套餐: {}", if created.is_empty() { "无".to_string() } else { created.join(", ") });
            }
        }

        info!("命令执行完成");
        Ok(())
    }
}

/// 解析命令行参数（args[0] 为程序名）
pub fn parse_args(args: &[String]) -> Result<CliCommand, PlatformError> {
    match args.get(1).map(String::as_str) {
        Some("migrate") | Some("up") => Ok(CliCommand::Migrate),
        Some("status") => Ok(CliCommand::Status),
        Some("rollback") | Some("down") => {
            let version = args
                .get(2)
                .ok_or_else(|| PlatformError::validation("version", "请提供要回滚的版本"))?;
            Ok(CliCommand::Rollback { version: version.clone() })
        }
        Some("seed") => Ok(CliCommand::Seed),
        Some(other) => Err(PlatformError::validation("command", format!("未知命令: {}", other))),
        None => Err(PlatformError::validation("command", "请提供命令")),
    }
}

/// 打印帮助信息
pub fn print_help() {
    println!("Chatwise 数据库管理工具");
    println!();
    println!("用法: chatwise-db <命令>");
    println!();
    println!("命令:");
    println!("  migrate             应用待处理的迁移");
    println!("  status              查看迁移状态");
    println!("  rollback <version>  回滚指定版本");
    println!("  seed                安装默认套餐");
}
