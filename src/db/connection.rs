// 数据库连接管理
// 处理连接池、健康检查和连接信息脱敏

use crate::config::DatabaseConfig;
use crate::errors::PlatformError;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument};

/// 数据库连接管理器
pub struct DatabaseManager {
    connection: Arc<DatabaseConnection>,
}

/// 数据库健康状态
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseHealth {
    pub healthy: bool,
    pub response_time_ms: u64,
    pub error_message: Option<String>,
}

impl DatabaseManager {
    /// 建立新的连接池
    #[instrument(skip(config))]
    pub async fn connect(config: DatabaseConfig) -> Result<Self, PlatformError> {
        let mut opt = ConnectOptions::new(&config.url);
        opt.max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .idle_timeout(Duration::from_secs(config.idle_timeout))
            .max_lifetime(Duration::from_secs(config.max_lifetime))
            .sqlx_logging(true)
            .sqlx_logging_level(tracing::log::LevelFilter::Debug);

        info!(
            url = %Self::mask_password(&config.url),
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "连接数据库"
        );

        let connection = Database::connect(opt)
            .await
            .map_err(|e| PlatformError::database(format!("数据库连接失败: {}", e)))?;

        Ok(Self {
            connection: Arc::new(connection),
        })
    }

    /// 获取数据库连接
    pub fn get_connection(&self) -> &Arc<DatabaseConnection> {
        &self.connection
    }

    /// 数据库健康检查
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), PlatformError> {
        ping(&self.connection).await.map_err(|e| {
            error!(error = %e, "数据库健康检查失败");
            PlatformError::database(format!("数据库健康检查失败: {}", e))
        })
    }

    /// 关闭数据库连接
    /// 仍有其他持有者时只释放本引用，连接池随最后一个引用关闭
    pub async fn close(self) -> Result<(), PlatformError> {
        let Ok(connection) = Arc::try_unwrap(self.connection) else {
            info!("数据库连接仍被共享，跳过显式关闭");
            return Ok(());
        };
        connection
            .close()
            .await
            .map_err(|e| PlatformError::database(format!("关闭数据库连接失败: {}", e)))?;
        info!("数据库连接已关闭");
        Ok(())
    }

    /// 屏蔽密码信息用于日志记录
    pub fn mask_password(url: &str) -> String {
        match url::Url::parse(url) {
            Ok(mut parsed_url) => {
                if parsed_url.password().is_some() {
                    let _ = parsed_url.set_password(Some("***"));
                }
                parsed_url.to_string()
            }
            Err(_) => "***".to_string(),
        }
    }
}

async fn ping(db: &DatabaseConnection) -> Result<(), sea_orm::DbErr> {
    db.execute(Statement::from_string(
        db.get_database_backend(),
        "SELECT 1".to_string(),
    ))
    .await
    .map(|_| ())
}

/// 对任意连接执行健康检查
pub async fn check_health(db: &DatabaseConnection) -> DatabaseHealth {
    let start = Instant::now();
    let result = ping(db).await;
    DatabaseHealth {
        healthy: result.is_ok(),
        response_time_ms: start.elapsed().as_millis() as u64,
        error_message: result.err().map(|e| e.to_string()),
    }
}
