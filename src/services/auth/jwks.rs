// JWKS 公钥提供者
// 从授权服务器拉取 RSA 公钥并按 kid 缓存

use crate::errors::{PlatformError, PlatformResult};
use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

/// JWKS 文档
#[derive(Debug, Clone, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

/// 单个 JSON Web Key
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    pub kid: Option<String>,
    pub kty: String,
    #[serde(default)]
    pub alg: Option<String>,
    #[serde(default)]
    pub n: Option<String>,
    #[serde(default)]
    pub e: Option<String>,
}

#[derive(Default)]
struct KeyStore {
    keys: HashMap<String, DecodingKey>,
    fetched_at: Option<Instant>,
    /// 最近一次尝试刷新的时间，无论成败
    attempted_at: Option<Instant>,
}

/// JWKS 公钥提供者
pub struct JwksProvider {
    client: reqwest::Client,
    url: String,
    min_refresh_interval: Duration,
    store: RwLock<KeyStore>,
}

impl JwksProvider {
    pub fn new(url: impl Into<String>, min_refresh_interval: Duration, timeout: Duration) -> PlatformResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| PlatformError::configuration(format!("创建 HTTP 客户端失败: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
            min_refresh_interval,
            store: RwLock::new(KeyStore::default()),
        })
    }

    /// 使用已知公钥构建，不访问授权服务器
    pub fn from_jwk_set(set: &JwkSet) -> PlatformResult<Self> {
        let provider = Self::new(String::new(), Duration::MAX, Duration::from_secs(1))?;
        let keys = decode_keys(set)?;
        {
            let mut store = provider
                .store
                .try_write()
                .map_err(|_| PlatformError::internal("JWKS 存储被占用"))?;
            let now = Instant::now();
            store.keys = keys;
            store.fetched_at = Some(now);
            store.attempted_at = Some(now);
        }
        Ok(provider)
    }

    /// 按 kid 获取解码公钥；未知 kid 时在间隔允许的情况下刷新一次
    pub async fn key(&self, kid: &str) -> PlatformResult<DecodingKey> {
        if let Some(key) = self.store.read().await.keys.get(kid) {
            return Ok(key.clone());
        }

        if self.claim_refresh().await {
            self.refresh().await?;
            if let Some(key) = self.store.read().await.keys.get(kid) {
                return Ok(key.clone());
            }
        }

        warn!(kid, "未知的签名密钥");
        Err(PlatformError::authentication(format!("未知的签名密钥: {}", kid)))
    }

    /// 间隔已到时占用本次刷新；并发请求中只有一个会拿到
    async fn claim_refresh(&self) -> bool {
        let mut store = self.store.write().await;
        let due = store
            .attempted_at
            .map_or(true, |at| at.elapsed() >= self.min_refresh_interval);
        if due {
            store.attempted_at = Some(Instant::now());
        }
        due
    }

    /// 重新拉取 JWKS
    #[instrument(skip(self), fields(url = %self.url))]
    pub async fn refresh(&self) -> PlatformResult<usize> {
        let result = self.fetch().await;
        if let Err(e) = &result {
            warn!(error = %e, "JWKS 刷新失败");
        }
        let keys = result?;
        let count = keys.len();

        let mut store = self.store.write().await;
        let now = Instant::now();
        store.keys = keys;
        store.fetched_at = Some(now);
        store.attempted_at = Some(now);

        info!(keys = count, "JWKS 已刷新");
        Ok(count)
    }

    async fn fetch(&self) -> PlatformResult<HashMap<String, DecodingKey>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| PlatformError::external_service("jwks", e.to_string()))?;
        let set: JwkSet = response.json().await?;
        decode_keys(&set)
    }

    /// 最近一次成功刷新的时间
    pub async fn fetched_at(&self) -> Option<Instant> {
        self.store.read().await.fetched_at
    }

    pub async fn key_count(&self) -> usize {
        self.store.read().await.keys.len()
    }
}

/// 只保留带 kid 的 RSA 公钥
fn decode_keys(set: &JwkSet) -> PlatformResult<HashMap<String, DecodingKey>> {
    let mut keys = HashMap::new();
    for jwk in &set.keys {
        let (Some(kid), Some(n), Some(e)) = (&jwk.kid, &jwk.n, &jwk.e) else {
            continue;
        };
        if jwk.kty != "RSA" {
            continue;
        }
        let key = DecodingKey::from_rsa_components(n, e)
            .map_err(|err| PlatformError::external_service("jwks", format!("无效的 RSA 公钥 {}: {}", kid, err)))?;
        keys.insert(kid.clone(), key);
    }
    Ok(keys)
}
