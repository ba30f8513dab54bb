// Chatwise 库
// 导出各模块供二进制程序和测试使用

pub mod api;
pub mod config;
pub mod db;
pub mod errors;
pub mod logging;
pub mod messaging;
pub mod scheduler;
pub mod services;
pub mod state;
