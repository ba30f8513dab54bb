// 日志系统设置

use crate::config::LoggingConfig;
use anyhow::{Context, Result};
use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// 默认压低的第三方模块日志
const QUIET_TARGETS: &[&str] = &["lapin=warn", "hyper=warn", "sqlx=warn", "aws_config=warn", "aws_smithy_runtime=warn"];

/// 日志系统初始化器
pub struct LoggingSetup;

impl LoggingSetup {
    /// 初始化日志系统；启用文件日志时返回的 guard 必须持有到进程退出
    pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
        let env_filter = Self::build_filter(&config.level);

        let (file_layer, guard) = if config.file_enabled {
            let path = config
                .file_path
                .as_deref()
                .context("启用文件日志时必须指定日志文件路径")?;
            let (directory, prefix) = Self::split_log_path(path);
            std::fs::create_dir_all(directory)
                .with_context(|| format!("无法创建日志目录: {}", directory.display()))?;

            let appender = tracing_appender::rolling::daily(directory, prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .boxed();
            (Some(layer), Some(guard))
        } else {
            (None, None)
        };

        let stdout_layer = match config.format.as_str() {
            "json" => fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .boxed(),
            "pretty" => fmt::layer()
                .pretty()
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .boxed(),
            _ => fmt::layer().compact().with_target(true).boxed(),
        };

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stdout_layer)
            .with(file_layer)
            .try_init()
            .context("日志系统已经初始化")?;

        tracing::info!(
            level = %config.level,
            format = %config.format,
            file = ?config.file_path.as_ref().filter(|_| config.file_enabled),
            "日志系统初始化完成"
        );

        Ok(guard)
    }

    /// RUST_LOG 优先，否则使用配置级别并压低第三方模块
    pub fn build_filter(level: &str) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let directives = std::iter::once(level.to_string())
                .chain(QUIET_TARGETS.iter().map(|s| s.to_string()))
                .collect::<Vec<_>>()
                .join(",");
            EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("info"))
        })
    }

    /// 将 `logs/chatwise.log` 拆成目录和文件前缀
    pub fn split_log_path(path: &str) -> (&Path, &str) {
        let path = Path::new(path);
        let directory = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let prefix = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("chatwise.log");
        (directory, prefix)
    }

    /// 解析日志级别
    pub fn parse_level(level: &str) -> Level {
        match level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }

    /// 开发环境日志配置
    pub fn development_config() -> LoggingConfig {
        LoggingConfig {
            level: "debug".to_string(),
            format: "pretty".to_string(),
            file_enabled: false,
            file_path: None,
        }
    }

    /// 生产环境日志配置
    pub fn production_config() -> LoggingConfig {
        LoggingConfig {
            level: "info".to_string(),
            format: "json".to_string(),
            file_enabled: true,
            file_path: Some("./logs/chatwise.log".to_string()),
        }
    }
}
