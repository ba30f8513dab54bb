// 错误处理模块
// 平台错误类型、错误响应与请求中间件

pub mod types;
pub mod middleware;
pub mod response;


pub use types::*;
pub use middleware::*;
pub use response::*;