// Brevo 事务邮件客户端

use crate::config::EmailConfig;
use crate::errors::{PlatformError, PlatformResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailAddress {
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// 待发送邮件
#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub to: EmailAddress,
    pub subject: String,
    pub html: String,
    pub tags: Vec<String>,
}

/// 邮件发送通道，返回服务商消息 ID
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> PlatformResult<String>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BrevoRequest<'a> {
    sender: &'a EmailAddress,
    to: [&'a EmailAddress; 1],
    subject: &'a str,
    html_content: &'a str,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    tags: &'a [String],
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BrevoResponse {
    message_id: String,
}

#[derive(Deserialize)]
struct BrevoError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

pub struct BrevoClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    sender: EmailAddress,
}

impl BrevoClient {
    pub fn new(config: &EmailConfig) -> PlatformResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .map_err(|e| PlatformError::configuration(format!("创建 HTTP 客户端失败: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.brevo_base_url.trim_end_matches('/').to_string(),
            api_key: config.brevo_api_key.clone(),
            sender: EmailAddress {
                email: config.sender_email.clone(),
                name: Some(config.sender_name.clone()),
            },
        })
    }
}

#[async_trait]
impl EmailSender for BrevoClient {
    #[instrument(skip(self, email), fields(to = %email.to.email))]
    async fn send(&self, email: &OutgoingEmail) -> PlatformResult<String> {
        if self.api_key.is_empty() {
            return Err(PlatformError::configuration("未配置 Brevo API key"));
        }

        let request = BrevoRequest {
            sender: &self.sender,
            to: [&email.to],
            subject: &email.subject,
            html_content: &email.html,
            tags: &email.tags,
        };
        let response = self
            .client
            .post(format!("{}/smtp/email", self.base_url))
            .header("api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .json::<BrevoError>()
                .await
                .ok()
                .and_then(|e| e.message.or(e.code))
                .unwrap_or_else(|| status.to_string());
            return Err(PlatformError::external_service("brevo", detail));
        }

        let body: BrevoResponse = response.json().await?;
        debug!(message_id = %body.message_id, "邮件已提交 Brevo");
        Ok(body.message_id)
    }
}
