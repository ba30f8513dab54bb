// 数据库模块
// 连接管理、迁移、实体与仓储

pub mod cli;
pub mod connection;
pub mod entities;
pub mod migrations;
pub mod repositories;


pub use connection::*;
pub use migrations::{MigrationManager, SeedDataManager};
pub use repositories::*;
