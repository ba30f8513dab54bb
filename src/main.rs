// Chatwise 服务入口
// 加载配置、连接依赖、启动消费者、定时任务与 HTTP 服务

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use chatwise::api::configure_routes;
use chatwise::config::{ConfigLoader, ServerConfig};
use chatwise::db::{DatabaseManager, MigrationManager};
use chatwise::errors::{ErrorHandlerMiddleware, RequestIdMiddleware};
use chatwise::logging::LoggingSetup;
use chatwise::messaging::{DbIdempotencyStore, Messaging};
use chatwise::services::auth::TokenValidator;
use chatwise::services::billing::PaystackClient;
use chatwise::services::communications::BrevoClient;
use chatwise::services::onboarding::S3Storage;
use chatwise::state::{AppState, Providers};

/// 后台任务退出的最长等待时间
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

fn io_error(e: impl std::fmt::Display) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
}

fn cors(config: &ServerConfig) -> Cors {
    let cors = Cors::default().allow_any_method().allow_any_header().max_age(3600);
    if config.cors_origins.is_empty() || config.cors_origins.iter().any(|o| o == "*") {
        return cors.allow_any_origin();
    }
    config
        .cors_origins
        .iter()
        .fold(cors, |cors, origin| cors.allowed_origin(origin))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let config = ConfigLoader::init().map_err(io_error)?;

    let _log_guard = LoggingSetup::init(&config.logging).map_err(io_error)?;
    tracing::info!(version = %config.environment.version, "启动 Chatwise");
    ConfigLoader::print_summary(config);

    // 数据库
    let database = DatabaseManager::connect(config.database.clone()).await.map_err(io_error)?;
    database.health_check().await.map_err(io_error)?;
    let db = database.get_connection().clone();

    if config.database.auto_migrate {
        let migrations = MigrationManager::new(db.clone());
        migrations.init().await.map_err(io_error)?;
        let applied = migrations.migrate().await.map_err(io_error)?;
        if !applied.is_empty() {
            tracing::info!(count = applied.len(), "已应用数据库迁移");
        }
    }

    // 外部服务
    let messaging = Messaging::connect(&config.broker).await;
    let providers = Providers {
        broker: messaging.broker.clone(),
        payments: Arc::new(PaystackClient::new(&config.billing).map_err(io_error)?),
        email: Arc::new(BrevoClient::new(&config.email).map_err(io_error)?),
        storage: Arc::new(S3Storage::connect(&config.storage).await),
        validator: Arc::new(TokenValidator::from_config(&config.auth).map_err(io_error)?),
    };
    let state = AppState::new(config.clone(), db.clone(), providers).map_err(io_error)?;

    // 后台任务
    let shutdown = CancellationToken::new();
    let mut tasks = messaging
        .spawn_consumers(
            &config.broker,
            state.event_handlers(),
            Arc::new(DbIdempotencyStore::new(db.clone())),
            shutdown.clone(),
        )
        .await;

    if config.scheduler.enabled {
        let scheduler = state.scheduler().map_err(io_error)?;
        tracing::info!(jobs = ?scheduler.job_names(), "定时任务已启动");
        tasks.extend(scheduler.spawn(shutdown.clone()));
    }

    // HTTP 服务
    tracing::info!("服务器启动地址: http://{}:{}", config.server.host, config.server.port);
    tracing::info!("API 文档: http://{}:{}/api/v1/docs/", config.server.host, config.server.port);

    let server_config = config.server.clone();
    let validator = state.validator.clone();
    let services = config.services.enabled.clone();
    let data = web::Data::new(state);

    let mut server = HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .wrap(cors(&server_config))
            .wrap(ErrorHandlerMiddleware)
            .wrap(RequestIdMiddleware)
            .wrap(tracing_actix_web::TracingLogger::default())
            .configure(configure_routes(validator.clone(), services.clone()))
    })
    .keep_alive(Duration::from_secs(config.server.keep_alive))
    .client_request_timeout(Duration::from_millis(config.server.client_timeout))
    .client_disconnect_timeout(Duration::from_millis(config.server.client_shutdown));

    if let Some(workers) = config.server.workers {
        server = server.workers(workers);
    }

    let result = server.bind((config.server.host.clone(), config.server.port))?.run().await;

    // HTTP 服务退出后停止后台任务
    tracing::info!("正在停止后台任务");
    shutdown.cancel();
    if tokio::time::timeout(SHUTDOWN_GRACE, futures::future::join_all(tasks)).await.is_err() {
        tracing::warn!("后台任务未在限定时间内退出");
    }
    if let Err(e) = database.close().await {
        tracing::warn!(error = %e, "关闭数据库连接失败");
    }

    tracing::info!("Chatwise 已停止");
    result
}
