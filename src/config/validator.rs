// 配置验证器
// 逐段验证配置，汇总所有违规项

use crate::config::{
    AppConfig, AuthConfig, BillingConfig, BrokerConfig, DatabaseConfig, EmailConfig,
    EnvironmentConfig, LoggingConfig, QualityConfig, SchedulerConfig, ServerConfig,
    ServicesConfig, StorageConfig,
};
use chatwise_common::CommonError;
use std::str::FromStr;
use url::Url;

/// 配置验证器
pub struct ConfigValidator;

impl ConfigValidator {
    /// 验证完整配置
    pub fn validate_all(config: &AppConfig) -> Result<(), Vec<CommonError>> {
        let results = [
            Self::validate_server(&config.server),
            Self::validate_database(&config.database),
            Self::validate_auth(&config.auth),
            Self::validate_broker(&config.broker),
            Self::validate_billing(&config.billing),
            Self::validate_email(&config.email),
            Self::validate_storage(&config.storage),
            Self::validate_scheduler(&config.scheduler),
            Self::validate_quality(&config.quality),
            Self::validate_services(&config.services),
            Self::validate_logging(&config.logging),
            Self::validate_environment(&config.environment),
        ];

        let errors: Vec<CommonError> = results.into_iter().filter_map(Result::err).collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn validate_server(config: &ServerConfig) -> Result<(), CommonError> {
        if config.port == 0 {
            return Err(CommonError::validation("服务器端口不能为 0"));
        }
        if config.host.is_empty() {
            return Err(CommonError::validation("服务器主机地址不能为空"));
        }
        if let Some(workers) = config.workers {
            if workers == 0 || workers > 64 {
                return Err(CommonError::validation("工作线程数必须在 1-64 之间"));
            }
        }
        Ok(())
    }

    pub fn validate_database(config: &DatabaseConfig) -> Result<(), CommonError> {
        if Url::parse(&config.url).is_err() {
            return Err(CommonError::validation("数据库 URL 格式无效"));
        }
        if config.max_connections == 0 {
            return Err(CommonError::validation("数据库最大连接数不能为 0"));
        }
        if config.min_connections > config.max_connections {
            return Err(CommonError::validation("数据库最小连接数不能大于最大连接数"));
        }
        if config.connect_timeout == 0 {
            return Err(CommonError::validation("数据库连接超时不能为 0"));
        }
        Ok(())
    }

    pub fn validate_auth(config: &AuthConfig) -> Result<(), CommonError> {
        if Url::parse(&config.jwks_url).is_err() {
            return Err(CommonError::validation("JWKS 地址格式无效"));
        }
        if config.issuer.is_empty() || config.audience.is_empty() {
            return Err(CommonError::validation("令牌 issuer 和 audience 不能为空"));
        }
        if config.token_cache_size == 0 {
            return Err(CommonError::validation("令牌缓存容量不能为 0"));
        }
        if config.token_cache_ttl == 0 {
            return Err(CommonError::validation("令牌缓存 TTL 不能为 0"));
        }
        if config.jwks_timeout == 0 {
            return Err(CommonError::validation("JWKS 请求超时不能为 0"));
        }
        if config.token_cache_key_len < 16 {
            return Err(CommonError::validation("令牌缓存键长度不能少于 16"));
        }
        Ok(())
    }

    pub fn validate_broker(config: &BrokerConfig) -> Result<(), CommonError> {
        if !config.enabled {
            return Ok(());
        }
        match Url::parse(&config.url) {
            Ok(url) if url.scheme() == "amqp" || url.scheme() == "amqps" => {}
            _ => return Err(CommonError::validation("消息代理 URL 必须是 amqp:// 或 amqps://")),
        }
        if config.prefetch == 0 {
            return Err(CommonError::validation("消息预取数量不能为 0"));
        }
        if config.max_retries > 20 {
            return Err(CommonError::validation("消息重试次数不建议超过 20"));
        }
        Ok(())
    }

    pub fn validate_billing(config: &BillingConfig) -> Result<(), CommonError> {
        if Url::parse(&config.paystack_base_url).is_err() {
            return Err(CommonError::validation("Paystack 地址格式无效"));
        }
        if config.currency.len() != 3 {
            return Err(CommonError::validation("货币代码必须是 3 位 ISO 代码"));
        }
        if config.trial_days <= 0 || config.period_days <= 0 {
            return Err(CommonError::validation("试用天数和订阅周期必须大于 0"));
        }
        if config.trial_plan_code.is_empty() {
            return Err(CommonError::validation("试用套餐代码不能为空"));
        }
        Ok(())
    }

    pub fn validate_email(config: &EmailConfig) -> Result<(), CommonError> {
        if Url::parse(&config.brevo_base_url).is_err() {
            return Err(CommonError::validation("Brevo 地址格式无效"));
        }
        if !config.sender_email.contains('@') {
            return Err(CommonError::validation("发件人邮箱格式无效"));
        }
        if config.max_attempts <= 0 {
            return Err(CommonError::validation("邮件最大尝试次数必须大于 0"));
        }
        Ok(())
    }

    pub fn validate_storage(config: &StorageConfig) -> Result<(), CommonError> {
        if let Some(endpoint) = &config.endpoint {
            if Url::parse(endpoint).is_err() {
                return Err(CommonError::validation("对象存储地址格式无效"));
            }
        }
        if config.bucket.is_empty() {
            return Err(CommonError::validation("存储桶名称不能为空"));
        }
        if config.max_file_size == 0 {
            return Err(CommonError::validation("最大文件大小不能为 0"));
        }
        if config.allowed_extensions.is_empty() {
            return Err(CommonError::validation("允许的文件扩展名列表不能为空"));
        }
        Ok(())
    }

    pub fn validate_scheduler(config: &SchedulerConfig) -> Result<(), CommonError> {
        for expr in [
            &config.expire_subscriptions_cron,
            &config.reset_usage_cron,
            &config.retry_notifications_cron,
            &config.purge_events_cron,
        ] {
            if cron::Schedule::from_str(expr).is_err() {
                return Err(CommonError::validation(format!("无效的 cron 表达式: {}", expr)));
            }
        }
        if config.processed_event_retention_days <= 0 {
            return Err(CommonError::validation("已处理事件保留天数必须大于 0"));
        }
        Ok(())
    }

    pub fn validate_quality(config: &QualityConfig) -> Result<(), CommonError> {
        if !(0.0..=1.0).contains(&config.low_confidence_threshold) {
            return Err(CommonError::validation("低置信度阈值必须在 0.0-1.0 之间"));
        }
        if config.gap_min_occurrences < 1 {
            return Err(CommonError::validation("知识缺口最少出现次数不能小于 1"));
        }
        Ok(())
    }

    pub fn validate_services(config: &ServicesConfig) -> Result<(), CommonError> {
        if config.enabled.is_empty() {
            return Err(CommonError::validation("至少需要启用一个服务"));
        }
        Ok(())
    }

    pub fn validate_logging(config: &LoggingConfig) -> Result<(), CommonError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.level.as_str()) {
            return Err(CommonError::validation(format!(
                "无效的日志级别: {}，有效值: {:?}",
                config.level, valid_levels
            )));
        }

        let valid_formats = ["json", "pretty", "compact"];
        if !valid_formats.contains(&config.format.as_str()) {
            return Err(CommonError::validation(format!(
                "无效的日志格式: {}，有效值: {:?}",
                config.format, valid_formats
            )));
        }

        if config.file_enabled && config.file_path.is_none() {
            return Err(CommonError::validation("启用文件日志时必须指定日志文件路径"));
        }

        Ok(())
    }

    pub fn validate_environment(config: &EnvironmentConfig) -> Result<(), CommonError> {
        let valid_environments = ["development", "staging", "production", "test"];
        if !valid_environments.contains(&config.name.as_str()) {
            return Err(CommonError::validation(format!(
                "无效的环境名称: {}，有效值: {:?}",
                config.name, valid_environments
            )));
        }
        Ok(())
    }
}
