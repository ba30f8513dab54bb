// 文档对象存储
// 上传校验、对象键生成与 S3 兼容存储（MinIO）

use crate::config::StorageConfig;
use crate::errors::{PlatformError, PlatformResult};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{config::Builder as S3ConfigBuilder, primitives::ByteStream, Client as S3Client};
use tracing::{debug, instrument};
use uuid::Uuid;

/// 对象存储
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, content_type: &str, bytes: Vec<u8>) -> PlatformResult<()>;

    async fn delete(&self, key: &str) -> PlatformResult<()>;
}

/// 文件扩展名（小写，不含点）
pub fn file_extension(file_name: &str) -> Option<String> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    (!stem.is_empty() && !ext.is_empty()).then(|| ext.to_ascii_lowercase())
}

/// 只保留文件名本身，并把空白和路径分隔之外的特殊字符替换为 `_`
pub fn sanitize_file_name(file_name: &str) -> String {
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name).trim();
    base.chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect()
}

/// 校验上传文件，返回扩展名
pub fn validate_upload(config: &StorageConfig, file_name: &str, size: u64) -> PlatformResult<String> {
    if size == 0 {
        return Err(PlatformError::validation("file", "文件为空"));
    }
    if size > config.max_file_size {
        return Err(PlatformError::validation(
            "file",
            format!("文件大小 {} 字节超过上限 {} 字节", size, config.max_file_size),
        ));
    }
    let ext = file_extension(file_name)
        .ok_or_else(|| PlatformError::validation("file", "文件缺少扩展名"))?;
    if !config.allowed_extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(&ext)) {
        return Err(PlatformError::validation("file", format!("不支持的文件类型 .{}", ext)));
    }
    Ok(ext)
}

/// `tenants/{tenant}/documents/{uuid}-{file}`
pub fn document_key(tenant_id: Uuid, object_id: Uuid, file_name: &str) -> String {
    format!("tenants/{}/documents/{}-{}", tenant_id, object_id, sanitize_file_name(file_name))
}

pub fn content_type_for(ext: &str) -> &'static str {
    match ext {
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/octet-stream",
    }
}

/// S3 兼容存储
pub struct S3Storage {
    client: S3Client,
    bucket: String,
}

impl S3Storage {
    pub async fn connect(config: &StorageConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .credentials_provider(aws_sdk_s3::config::Credentials::new(
                config.access_key.clone(),
                config.secret_key.clone(),
                None,
                None,
                "static",
            ));
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let base_config = loader.load().await;

        let s3_config = S3ConfigBuilder::from(&base_config)
            .force_path_style(config.endpoint.is_some())
            .build();

        Self {
            client: S3Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3Storage {
    #[instrument(skip(self, bytes), fields(bucket = %self.bucket, size = bytes.len()))]
    async fn put(&self, key: &str, content_type: &str, bytes: Vec<u8>) -> PlatformResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| PlatformError::storage(format!("上传 {} 失败: {}", key, e)))?;
        debug!(key, "对象已上传");
        Ok(())
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn delete(&self, key: &str) -> PlatformResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| PlatformError::storage(format!("删除 {} 失败: {}", key, e)))?;
        Ok(())
    }
}
