// 中间件模块

pub mod auth;

pub use auth::{bearer_token, JwtAuthMiddleware};
