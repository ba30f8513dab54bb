// 配置管理模块
// 分层配置、全局加载与验证

pub mod settings;
pub mod loader;
pub mod validator;

#[cfg(test)]
mod tests;

pub use settings::*;
pub use loader::*;
pub use validator::*;