#[cfg(test)]
mod tests {
    use crate::api::routes::{configure_routes, openapi_spec};
    use crate::config::{AppConfig, ServiceKind};
    use crate::db::entities::chat_session::SessionStatus;
    use crate::db::entities::subscription::SubscriptionStatus;
    use crate::errors::{PlatformError, PlatformResult};
    use crate::messaging::InMemoryBroker;
    use crate::services::auth::testing;
    use crate::services::billing::paystack::{InitializeTransaction, InitializedTransaction, TransactionDetails};
    use crate::services::billing::PaymentGateway;
    use crate::services::communications::{EmailSender, OutgoingEmail};
    use crate::services::fixtures;
    use crate::services::onboarding::ObjectStore;
    use crate::state::{AppState, Providers};
    use actix_web::{http::header, test, web, App};
    use async_trait::async_trait;
    use sea_orm::{DatabaseBackend, DatabaseConnection, MockDatabase};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use uuid::Uuid;

    struct OfflineGateway;

    #[async_trait]
    impl PaymentGateway for OfflineGateway {
        async fn initialize(&self, _request: &InitializeTransaction) -> PlatformResult<InitializedTransaction> {
            Err(PlatformError::external_service("paystack", "offline"))
        }

        async fn verify(&self, _reference: &str) -> PlatformResult<TransactionDetails> {
            Err(PlatformError::external_service("paystack", "offline"))
        }
    }

    struct OfflineEmail;

    #[async_trait]
    impl EmailSender for OfflineEmail {
        async fn send(&self, _email: &OutgoingEmail) -> PlatformResult<String> {
            Err(PlatformError::external_service("brevo", "offline"))
        }
    }

    struct OfflineStore;

    #[async_trait]
    impl ObjectStore for OfflineStore {
        async fn put(&self, _key: &str, _content_type: &str, _bytes: Vec<u8>) -> PlatformResult<()> {
            Err(PlatformError::storage("offline"))
        }

        async fn delete(&self, _key: &str) -> PlatformResult<()> {
            Ok(())
        }
    }

    fn state(db: Arc<DatabaseConnection>) -> AppState {
        state_with(db, AppConfig::default())
    }

    fn state_with(db: Arc<DatabaseConnection>, config: AppConfig) -> AppState {
        let providers = Providers {
            broker: Arc::new(InMemoryBroker::new()),
            payments: Arc::new(OfflineGateway),
            email: Arc::new(OfflineEmail),
            storage: Arc::new(OfflineStore),
            validator: Arc::new(testing::validator()),
        };
        AppState::new(config, db, providers).unwrap()
    }

    fn empty_db() -> Arc<DatabaseConnection> {
        fixtures::connect(MockDatabase::new(DatabaseBackend::Postgres))
    }

    macro_rules! test_app {
        (@state $state:expr) => {{
            let state = $state;
            let validator = state.validator.clone();
            let services = state.config.services.enabled.clone();
            test::init_service(
                App::new()
                    .app_data(web::Data::new(state))
                    .configure(configure_routes(validator, services)),
            )
            .await
        }};
        ($db:expr) => {
            test_app!(@state state($db))
        };
    }

    fn bearer(token: &str) -> (header::HeaderName, String) {
        (header::AUTHORIZATION, format!("Bearer {}", token))
    }

    #[actix_web::test]
    async fn test_protected_route_requires_token() {
        let app = test_app!(empty_db());

        let req = test::TestRequest::get().uri("/api/v1/billing/subscription").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 401);
    }

    #[actix_web::test]
    async fn test_public_routes_skip_auth() {
        let app = test_app!(empty_db());

        let req = test::TestRequest::get().uri("/health").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 200);

        let req = test::TestRequest::get().uri("/api/v1/openapi.json").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 200);
    }

    #[actix_web::test]
    async fn test_webhook_reaches_signature_check_without_token() {
        let app = test_app!(empty_db());

        let req = test::TestRequest::post()
            .uri("/api/v1/billing/webhooks/paystack")
            .set_payload(r#"{"event":"charge.success","data":{"reference":"ref-1"}}"#)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 401);

        let body: Value = test::read_body_json(resp).await;
        assert!(body["error"]["message"].as_str().unwrap().contains("webhook"));
    }

    #[actix_web::test]
    async fn test_current_subscription_for_token_tenant() {
        let tenant_id = Uuid::new_v4();
        let subscription =
            fixtures::subscription(tenant_id, Uuid::new_v4(), SubscriptionStatus::Active, fixtures::days_from_now(20));
        let db = fixtures::connect(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([vec![subscription.clone()]]),
        );
        let app = test_app!(db);

        let req = test::TestRequest::get()
            .uri("/api/v1/billing/subscription")
            .insert_header(bearer(&testing::token_for_tenant(tenant_id)))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["data"]["id"], json!(subscription.id));
        assert_eq!(body["data"]["status"], json!("active"));
    }

    #[actix_web::test]
    async fn test_member_cannot_target_other_tenant() {
        let app = test_app!(empty_db());

        let req = test::TestRequest::get()
            .uri("/api/v1/billing/usage")
            .insert_header(bearer(&testing::token_for_tenant(Uuid::new_v4())))
            .insert_header(("X-Tenant-ID", Uuid::new_v4().to_string()))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 403);
    }

    #[actix_web::test]
    async fn test_plan_management_requires_admin() {
        let app = test_app!(empty_db());

        let req = test::TestRequest::post()
            .uri("/api/v1/billing/plans")
            .insert_header(bearer(&testing::token_for_tenant(Uuid::new_v4())))
            .set_json(json!({ "code": "pro", "name": "Pro", "price_minor": 1500000, "limits": {} }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 403);
    }

    #[actix_web::test]
    async fn test_posting_to_closed_session_conflicts() {
        let tenant_id = Uuid::new_v4();
        let session = fixtures::chat_session(tenant_id, SessionStatus::Closed);
        let db = fixtures::connect(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([vec![session.clone()]]),
        );
        let app = test_app!(db);

        let req = test::TestRequest::post()
            .uri(&format!("/api/v1/chat/sessions/{}/messages", session.id))
            .insert_header(bearer(&testing::token_for_tenant(tenant_id)))
            .set_json(json!({ "content": "你们支持退款吗？" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 409);
    }

    #[actix_web::test]
    async fn test_workflow_definitions_listed() {
        let app = test_app!(empty_db());

        let req = test::TestRequest::get()
            .uri("/api/v1/workflows/definitions")
            .insert_header(bearer(&testing::token_for_tenant(Uuid::new_v4())))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;

        let keys: Vec<&str> = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["key"].as_str().unwrap())
            .collect();
        assert!(keys.contains(&"tenant_onboarding"));
        assert!(keys.contains(&"invoice_resend"));
    }

    #[actix_web::test]
    async fn test_disabled_service_routes_not_mounted() {
        let mut config = AppConfig::default();
        config.services.enabled = vec![ServiceKind::Chat];
        let app = test_app!(@state state_with(empty_db(), config));
        let token = testing::token_for_tenant(Uuid::new_v4());

        let req = test::TestRequest::get()
            .uri("/api/v1/workflows/definitions")
            .insert_header(bearer(&token))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 404);

        let req = test::TestRequest::post()
            .uri("/api/v1/billing/webhooks/paystack")
            .set_payload("{}")
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 401);
    }

    #[core::prelude::v1::test]
    fn test_openapi_spec_merges_modules() {
        let spec = serde_json::to_value(openapi_spec()).unwrap();

        for path in [
            "/health",
            "/billing/plans",
            "/billing/webhooks/paystack",
            "/chat/sessions",
            "/quality/gaps",
            "/communications/logs",
            "/onboarding/documents",
            "/workflows/executions",
        ] {
            assert!(spec["paths"].get(path).is_some(), "缺少路径 {}", path);
        }
        assert!(spec["components"]["securitySchemes"].get("bearer_auth").is_some());
    }
}
