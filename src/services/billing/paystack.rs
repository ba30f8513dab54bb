// Paystack 支付网关
// 交易初始化、交易查询与 webhook 签名校验

use crate::config::BillingConfig;
use crate::errors::{PlatformError, PlatformResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use std::time::Duration;
use tracing::{debug, instrument};

/// webhook 签名头
pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

/// 校验 webhook 签名：原始请求体的 HMAC-SHA512（十六进制）
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha512>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// 计算签名，供测试和本地联调使用
pub fn sign(secret: &str, body: &[u8]) -> PlatformResult<String> {
    let mut mac = Hmac::<Sha512>::new_from_slice(secret.as_bytes())
        .map_err(|e| PlatformError::internal(format!("无效的签名密钥: {}", e)))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// 初始化交易参数
#[derive(Debug, Clone, Serialize)]
pub struct InitializeTransaction {
    pub email: String,
    /// 最小货币单位
    pub amount: i64,
    pub currency: String,
    pub reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    pub metadata: serde_json::Value,
}

/// 初始化交易结果
#[derive(Debug, Clone, Deserialize)]
pub struct InitializedTransaction {
    pub authorization_url: String,
    pub access_code: String,
    pub reference: String,
}

/// 交易查询结果
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionDetails {
    pub reference: String,
    /// success、failed、abandoned 等
    pub status: String,
    pub amount: i64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub gateway_response: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaystackEnvelope<T> {
    status: bool,
    message: String,
    data: Option<T>,
}

/// webhook 事件
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    pub data: TransactionDetails,
}

/// 支付网关
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initialize(&self, request: &InitializeTransaction) -> PlatformResult<InitializedTransaction>;

    async fn verify(&self, reference: &str) -> PlatformResult<TransactionDetails>;
}

/// Paystack HTTP 客户端
pub struct PaystackClient {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
}

impl PaystackClient {
    pub fn new(config: &BillingConfig) -> PlatformResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PlatformError::configuration(format!("创建 HTTP 客户端失败: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.paystack_base_url.trim_end_matches('/').to_string(),
            secret_key: config.paystack_secret_key.clone(),
        })
    }

    async fn unwrap_envelope<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> PlatformResult<T> {
        let status = response.status();
        let envelope: PaystackEnvelope<T> = response.json().await?;
        if !status.is_success() || !envelope.status {
            return Err(PlatformError::external_service("paystack", envelope.message));
        }
        envelope
            .data
            .ok_or_else(|| PlatformError::external_service("paystack", "响应缺少 data"))
    }
}

#[async_trait]
impl PaymentGateway for PaystackClient {
    #[instrument(skip(self, request), fields(reference = %request.reference))]
    async fn initialize(&self, request: &InitializeTransaction) -> PlatformResult<InitializedTransaction> {
        let response = self
            .client
            .post(format!("{}/transaction/initialize", self.base_url))
            .bearer_auth(&self.secret_key)
            .json(request)
            .send()
            .await?;
        let data: InitializedTransaction = Self::unwrap_envelope(response).await?;
        debug!(reference = %data.reference, "Paystack 交易已初始化");
        Ok(data)
    }

    #[instrument(skip(self))]
    async fn verify(&self, reference: &str) -> PlatformResult<TransactionDetails> {
        let response = self
            .client
            .get(format!("{}/transaction/verify/{}", self.base_url, reference))
            .bearer_auth(&self.secret_key)
            .send()
            .await?;
        Self::unwrap_envelope(response).await
    }
}
