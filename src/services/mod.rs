// 服务层模块
// 各业务服务的领域逻辑与事件消费者

pub mod auth;
pub mod billing;
pub mod chat;
pub mod communications;
pub mod onboarding;
pub mod quality;
pub mod workflow;

#[cfg(test)]
pub(crate) mod fixtures;

pub use auth::{AuthenticatedUser, Claims, TokenValidator};
pub use chat::ChatService;
pub use quality::QualityService;
