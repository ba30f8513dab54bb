// 日志系统模块
// 结构化日志输出与滚动文件日志

pub mod setup;

#[cfg(test)]
mod tests;

pub use setup::*;
