// Chatwise Common Package
// 通用类型定义和工具函数

pub mod types;
pub mod errors;
pub mod events;

pub use types::*;
pub use errors::*;
pub use events::*;
