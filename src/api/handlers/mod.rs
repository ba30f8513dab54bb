// API 处理器模块
// 按服务划分的 HTTP 处理器

pub mod billing;
pub mod chat;
pub mod communications;
pub mod health;
pub mod onboarding;
pub mod quality;
pub mod webhooks;
pub mod workflow;

#[cfg(test)]
mod tests;
