// API 模块
// HTTP 路由、处理器、提取器与中间件

pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod responses;
pub mod routes;

pub use extractors::{AdminUser, TenantScope};
pub use responses::HttpResponseBuilder;
pub use routes::{configure_routes, openapi_spec, ApiDoc};
