// 认证服务测试

#[cfg(test)]
mod tests {
    use crate::services::auth::testing::{self, TEST_KID};
    use crate::services::auth::*;
    use crate::errors::PlatformError;
    use chrono::Utc;
    use std::time::Duration;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_cache_key_is_token_suffix() {
        let cache = TokenCache::new(4, Duration::from_secs(60), 8);
        assert_eq!(cache.cache_key("header.payload.signature"), "ignature");
        assert_eq!(cache.cache_key("short"), "short");
    }

    #[tokio::test]
    async fn test_cache_returns_claims_within_ttl() {
        let cache = TokenCache::new(4, Duration::from_secs(60), 16);
        let claims = testing::claims(Some(Uuid::new_v4()), &[]);

        cache.insert("aaa.bbb.ccc", claims.clone()).await;
        assert_eq!(cache.get("aaa.bbb.ccc").await, Some(claims));
        assert_eq!(cache.get("aaa.bbb.ddd").await, None);
    }

    #[tokio::test]
    async fn test_cache_drops_entries_past_ttl() {
        let cache = TokenCache::new(4, Duration::from_millis(20), 16);
        cache.insert("token-1", testing::claims(None, &[])).await;

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(cache.get("token-1").await.is_none());
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn test_cache_drops_expired_tokens() {
        let cache = TokenCache::new(4, Duration::from_secs(60), 16);
        let mut claims = testing::claims(None, &[]);
        claims.exp = Utc::now().timestamp() - 1;

        cache.insert("expired-token", claims).await;
        assert!(cache.get("expired-token").await.is_none());
    }

    #[tokio::test]
    async fn test_cache_evicts_oldest_when_full() {
        let cache = TokenCache::new(2, Duration::from_secs(60), 16);
        cache.insert("token-a", testing::claims(None, &[])).await;
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache.insert("token-b", testing::claims(None, &[])).await;
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache.insert("token-c", testing::claims(None, &[])).await;

        assert_eq!(cache.len().await, 2);
        assert!(cache.get("token-a").await.is_none());
        assert!(cache.get("token-b").await.is_some());
        assert!(cache.get("token-c").await.is_some());
    }

    #[tokio::test]
    async fn test_validator_accepts_signed_token_and_caches_it() {
        let validator = testing::validator();
        let tenant_id = Uuid::new_v4();
        let claims = testing::claims(Some(tenant_id), &["member"]);
        let token = testing::sign(&claims);

        let user = validator.validate(&token).await.unwrap();
        assert_eq!(user.tenant_id, Some(tenant_id));
        assert_eq!(user.user_id, claims.sub);
        assert_eq!(validator.cache().len().await, 1);

        // 第二次命中缓存
        let again = validator.validate(&token).await.unwrap();
        assert_eq!(again, user);
    }

    #[tokio::test]
    async fn test_validator_rejects_garbage_and_unknown_kid() {
        let validator = testing::validator();

        let err = validator.validate("not-a-jwt").await.unwrap_err();
        assert!(matches!(err, PlatformError::Authentication { .. }));

        let token = testing::sign_with_kid(&testing::claims(None, &[]), "rotated-away");
        let err = validator.validate(&token).await.unwrap_err();
        assert!(matches!(err, PlatformError::Authentication { .. }));
    }

    #[tokio::test]
    async fn test_validator_rejects_expired_token() {
        let validator = testing::validator();
        let mut claims = testing::claims(None, &[]);
        claims.exp = Utc::now().timestamp() - 600;

        let err = validator.validate(&testing::sign(&claims)).await.unwrap_err();
        assert_eq!(err.status_code(), 401);
    }

    #[tokio::test]
    async fn test_validator_rejects_wrong_issuer() {
        let validator = testing::validator();
        let mut claims = testing::claims(None, &[]);
        claims.iss = Some("https://evil.example.com".into());

        assert!(validator.validate(&testing::sign(&claims)).await.is_err());
    }

    #[tokio::test]
    async fn test_jwks_provider_lookup() {
        let provider = JwksProvider::from_jwk_set(&testing::jwk_set()).unwrap();
        assert_eq!(provider.key_count().await, 1);
        assert!(provider.key(TEST_KID).await.is_ok());
        assert!(provider.key("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_stalled_jwks_endpoint_times_out_and_throttles_retries() {
        // 只监听不应答的端点
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/.well-known/jwks.json", listener.local_addr().unwrap());
        let provider = JwksProvider::new(url, Duration::from_secs(60), Duration::from_millis(200)).unwrap();

        let first = tokio::time::timeout(Duration::from_secs(5), provider.key("rotated"))
            .await
            .expect("JWKS 请求应在超时内返回");
        assert_eq!(first.unwrap_err().status_code(), 408);
        assert!(provider.fetched_at().await.is_none());

        // 间隔内不再访问授权服务器
        let started = std::time::Instant::now();
        let second = provider.key("rotated").await.unwrap_err();
        assert!(matches!(second, PlatformError::Authentication { .. }));
        assert!(started.elapsed() < Duration::from_millis(100));
        drop(listener);
    }

    #[tokio::test]
    async fn test_non_rsa_keys_are_skipped() {
        let set = JwkSet {
            keys: vec![Jwk {
                kid: Some("ec".into()),
                kty: "EC".into(),
                alg: None,
                n: None,
                e: None,
            }],
        };
        let provider = JwksProvider::from_jwk_set(&set).unwrap();
        assert_eq!(provider.key_count().await, 0);
    }

    #[test]
    fn test_tenant_access_rules() {
        let tenant = Uuid::new_v4();
        let member = AuthenticatedUser::from(testing::claims(Some(tenant), &["member"]));
        let admin = AuthenticatedUser::from(testing::claims(None, &[ADMIN_ROLE]));

        assert!(member.can_access_tenant(tenant));
        assert!(!member.can_access_tenant(Uuid::new_v4()));
        assert!(member.ensure_tenant_access(Uuid::new_v4()).is_err());
        assert!(admin.can_access_tenant(Uuid::new_v4()));
        assert!(admin.require_tenant().is_err());

        assert!(member.has_roles(&["member".to_string()]));
        assert!(!member.has_roles(&["billing".to_string()]));
        assert!(admin.has_roles(&["billing".to_string()]));
    }
}
