// 令牌验证器
// 缓存 → kid → JWKS 公钥 → RS256 验签

use crate::config::AuthConfig;
use crate::errors::{PlatformError, PlatformResult};
use crate::services::auth::jwks::JwksProvider;
use crate::services::auth::token_cache::TokenCache;
use crate::services::auth::{AuthenticatedUser, Claims};
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

pub struct TokenValidator {
    jwks: Arc<JwksProvider>,
    cache: TokenCache,
    validation: Validation,
}

impl TokenValidator {
    pub fn new(jwks: Arc<JwksProvider>, cache: TokenCache, issuer: &str, audience: &str, leeway: u64) -> Self {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = leeway;
        if !issuer.is_empty() {
            validation.set_issuer(&[issuer]);
        }
        if audience.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(&[audience]);
        }

        Self { jwks, cache, validation }
    }

    pub fn from_config(config: &AuthConfig) -> PlatformResult<Self> {
        let jwks = Arc::new(JwksProvider::new(
            config.jwks_url.clone(),
            Duration::from_secs(config.jwks_refresh_interval),
            Duration::from_secs(config.jwks_timeout),
        )?);
        let cache = TokenCache::new(
            config.token_cache_size,
            Duration::from_secs(config.token_cache_ttl),
            config.token_cache_key_len,
        );
        Ok(Self::new(jwks, cache, &config.issuer, &config.audience, config.leeway))
    }

    pub fn cache(&self) -> &TokenCache {
        &self.cache
    }

    /// 验证访问令牌
    #[instrument(skip(self, token))]
    pub async fn validate(&self, token: &str) -> PlatformResult<AuthenticatedUser> {
        if let Some(claims) = self.cache.get(token).await {
            debug!(sub = %claims.sub, "令牌缓存命中");
            return Ok(AuthenticatedUser::from(claims));
        }

        let header = decode_header(token)
            .map_err(|e| PlatformError::authentication(format!("无效的令牌头: {}", e)))?;
        if header.alg != Algorithm::RS256 {
            return Err(PlatformError::authentication(format!(
                "不支持的签名算法: {:?}",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| PlatformError::authentication("令牌缺少 kid"))?;

        let key = self.jwks.key(&kid).await?;
        let data = decode::<Claims>(token, &key, &self.validation).map_err(|e| {
            warn!(error = %e, "令牌验签失败");
            PlatformError::authentication(format!("令牌验证失败: {}", e))
        })?;

        self.cache.insert(token, data.claims.clone()).await;
        Ok(AuthenticatedUser::from(data.claims))
    }
}
