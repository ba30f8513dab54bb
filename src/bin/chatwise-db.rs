// Chatwise 数据库管理 CLI 工具

use chatwise::config::AppConfig;
use chatwise::db::cli::{parse_args, print_help, CliExecutor};
use std::env;
use tracing::error;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().compact().init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 || args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return;
    }

    let command = match parse_args(&args) {
        Ok(command) => command,
        Err(e) => {
            error!("解析命令失败: {}", e);
            print_help();
            std::process::exit(2);
        }
    };

    let _ = dotenvy::dotenv();
    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            error!("加载配置失败: {}", e);
            std::process::exit(1);
        }
    };

    let executor = match CliExecutor::new(config).await {
        Ok(executor) => executor,
        Err(e) => {
            error!("连接数据库失败: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = executor.execute(command).await {
        error!("执行命令失败: {}", e);
        std::process::exit(1);
    }
}
