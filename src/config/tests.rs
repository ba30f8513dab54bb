// 配置系统测试

#[cfg(test)]
mod tests {
    use crate::config::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.auth.token_cache_size, 1000);
        assert_eq!(config.billing.trial_days, 14);
        assert_eq!(config.services.enabled.len(), 6);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        config.database.max_connections = 0;
        config.quality.low_confidence_threshold = 1.5;

        let errors = ConfigValidator::validate_all(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(config.validate().unwrap_err().to_string().contains("配置验证失败"));
    }

    #[test]
    fn test_broker_validation_skipped_when_disabled() {
        let mut broker = AppConfig::default().broker;
        broker.url = "http://not-amqp".to_string();
        assert!(ConfigValidator::validate_broker(&broker).is_err());

        broker.enabled = false;
        assert!(ConfigValidator::validate_broker(&broker).is_ok());
    }

    #[test]
    fn test_scheduler_rejects_bad_cron() {
        let mut scheduler = AppConfig::default().scheduler;
        assert!(ConfigValidator::validate_scheduler(&scheduler).is_ok());

        scheduler.reset_usage_cron = "every month".to_string();
        assert!(ConfigValidator::validate_scheduler(&scheduler).is_err());
    }

    #[test]
    fn test_auth_key_len_lower_bound() {
        let mut auth = AppConfig::default().auth;
        auth.token_cache_key_len = 8;
        assert!(ConfigValidator::validate_auth(&auth).is_err());

        let mut auth = AppConfig::default().auth;
        auth.jwks_timeout = 0;
        assert!(ConfigValidator::validate_auth(&auth).is_err());
    }

    #[test]
    fn test_logging_file_requires_path() {
        let mut logging = AppConfig::default().logging;
        logging.file_enabled = true;
        assert!(ConfigValidator::validate_logging(&logging).is_err());

        logging.file_path = Some("logs/chatwise.log".to_string());
        assert!(ConfigValidator::validate_logging(&logging).is_ok());

        logging.format = "xml".to_string();
        assert!(ConfigValidator::validate_logging(&logging).is_err());
    }

    #[test]
    fn test_service_enabled() {
        let mut config = AppConfig::default();
        config.services.enabled = vec![ServiceKind::Billing, ServiceKind::Chat];

        assert!(config.service_enabled(ServiceKind::Billing));
        assert!(!config.service_enabled(ServiceKind::Workflow));
        assert!(ConfigValidator::validate_services(&ServicesConfig { enabled: vec![] }).is_err());
    }

    #[test]
    fn test_service_kind_serde() {
        let kinds: Vec<ServiceKind> = serde_json::from_str(r#"["billing","communications"]"#).unwrap();
        assert_eq!(kinds, vec![ServiceKind::Billing, ServiceKind::Communications]);
        assert_eq!(ServiceKind::Onboarding.as_str(), "onboarding");
    }

    #[test]
    fn test_environment_methods() {
        let mut config = AppConfig::default();
        assert!(config.is_development());

        config.environment.name = "production".to_string();
        assert!(config.is_production());
        assert!(ConfigValidator::validate_environment(&config.environment).is_ok());

        config.environment.name = "qa".to_string();
        assert!(ConfigValidator::validate_environment(&config.environment).is_err());
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[server]
port = 9090

[billing]
trial_days = 7
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.billing.trial_days, 7);
        assert_eq!(config.database.max_connections, AppConfig::default().database.max_connections);
        assert_eq!(config.environment.version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_load_from_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.billing.trial_days, AppConfig::default().billing.trial_days);
    }
}
