// 数据库仓储模块
// 跨服务复用的数据访问

pub mod tenant;
pub mod plan;
pub mod subscription;
pub mod processed_event;

pub use tenant::{NewTenant, TenantRepository};
pub use plan::PlanRepository;
pub use subscription::SubscriptionRepository;
pub use processed_event::ProcessedEventRepository;
