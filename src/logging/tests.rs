// 日志系统测试

#[cfg(test)]
mod tests {
    use crate::logging::LoggingSetup;
    use std::path::Path;
    use tracing::Level;

    #[test]
    fn test_parse_level() {
        assert_eq!(LoggingSetup::parse_level("TRACE"), Level::TRACE);
        assert_eq!(LoggingSetup::parse_level("warn"), Level::WARN);
        assert_eq!(LoggingSetup::parse_level("nonsense"), Level::INFO);
    }

    #[test]
    fn test_split_log_path() {
        let (dir, prefix) = LoggingSetup::split_log_path("./logs/chatwise.log");
        assert_eq!(dir, Path::new("./logs"));
        assert_eq!(prefix, "chatwise.log");

        let (dir, prefix) = LoggingSetup::split_log_path("app.log");
        assert_eq!(dir, Path::new("."));
        assert_eq!(prefix, "app.log");
    }

    #[test]
    fn test_environment_presets() {
        let dev = LoggingSetup::development_config();
        assert_eq!(dev.format, "pretty");
        assert!(!dev.file_enabled);

        let prod = LoggingSetup::production_config();
        assert!(prod.file_enabled);
        assert!(crate::config::ConfigValidator::validate_logging(&prod).is_ok());
    }

    #[test]
    fn test_build_filter_accepts_configured_level() {
        let filter = LoggingSetup::build_filter("debug");
        assert!(!filter.to_string().is_empty());
    }
}
