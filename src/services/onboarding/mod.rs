// 入驻服务模块
// 租户注册、文档上传与摄取任务

pub mod ingestion;
pub mod storage;
pub mod tenant;

#[cfg(test)]
mod tests;

pub use ingestion::{IngestionJobView, IngestionService, DocumentView, JobQuery, JobStatusUpdate, UploadResponse, UrlIngestionRequest};
pub use storage::{ObjectStore, S3Storage};
pub use tenant::{RegisterTenantRequest, TenantOwner, TenantService, TenantView, UpdateTenantRequest};
