#[cfg(test)]
mod tests {
    use crate::config::AppConfig;
    use crate::db::entities::ingestion_job::JobStatus;
    use crate::db::entities::subscription::SubscriptionStatus;
    use crate::errors::PlatformResult;
    use crate::messaging::topics::routing;
    use crate::messaging::InMemoryBroker;
    use crate::services::billing::{SubscriptionService, UsageService};
    use crate::services::fixtures;
    use crate::services::onboarding::ingestion::{validate_source_url, IngestionService, JobStatusUpdate};
    use crate::services::onboarding::storage::{document_key, file_extension, sanitize_file_name, validate_upload, ObjectStore};
    use crate::services::onboarding::tenant::{validate_slug, RegisterTenantRequest, TenantOwner, TenantService};
    use async_trait::async_trait;
    use sea_orm::{DatabaseBackend, DatabaseConnection, MockDatabase, Value};
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    #[derive(Default)]
    struct StubStore {
        puts: Mutex<Vec<(String, String, usize)>>,
        deletes: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ObjectStore for StubStore {
        async fn put(&self, key: &str, content_type: &str, bytes: Vec<u8>) -> PlatformResult<()> {
            self.puts.lock().unwrap().push((key.to_string(), content_type.to_string(), bytes.len()));
            Ok(())
        }

        async fn delete(&self, key: &str) -> PlatformResult<()> {
            self.deletes.lock().unwrap().push(key.to_string());
            Ok(())
        }
    }

    fn ingestion(db: Arc<DatabaseConnection>, broker: Arc<InMemoryBroker>, store: Arc<StubStore>) -> IngestionService {
        let config = AppConfig::default();
        let subscriptions = SubscriptionService::new(db.clone(), broker.clone(), &config.billing);
        let usage = Arc::new(UsageService::new(db.clone(), subscriptions));
        IngestionService::new(db, broker, store, usage, config.storage)
    }

    #[test]
    fn test_validate_slug() {
        assert!(validate_slug("acme").is_ok());
        assert!(validate_slug("acme-support-2").is_ok());
        assert!(validate_slug(&"a".repeat(63)).is_ok());

        assert!(validate_slug("ab").is_err());
        assert!(validate_slug(&"a".repeat(64)).is_err());
        assert!(validate_slug("Acme").is_err());
        assert!(validate_slug("acme_support").is_err());
        assert!(validate_slug("-acme").is_err());
        assert!(validate_slug("acme-").is_err());
        assert!(validate_slug("admin").is_err());
    }

    #[test]
    fn test_file_names() {
        assert_eq!(file_extension("FAQ.PDF"), Some("pdf".to_string()));
        assert_eq!(file_extension("archive.tar.gz"), Some("gz".to_string()));
        assert_eq!(file_extension(".env"), None);
        assert_eq!(file_extension("README"), None);

        assert_eq!(sanitize_file_name("../../etc/pass wd.txt"), "pass_wd.txt");
        assert_eq!(sanitize_file_name("C:\\docs\\price list.pdf"), "price_list.pdf");
    }

    #[test]
    fn test_validate_upload() {
        let config = AppConfig::default().storage;
        assert_eq!(validate_upload(&config, "faq.PDF", 1024).unwrap(), "pdf");
        assert!(validate_upload(&config, "faq.pdf", 0).is_err());
        assert!(validate_upload(&config, "faq.pdf", config.max_file_size + 1).is_err());
        assert!(validate_upload(&config, "setup.exe", 10).is_err());
        assert!(validate_upload(&config, "noext", 10).is_err());
    }

    #[test]
    fn test_document_key_layout() {
        let tenant_id = Uuid::new_v4();
        let object_id = Uuid::new_v4();
        assert_eq!(
            document_key(tenant_id, object_id, "Price List.pdf"),
            format!("tenants/{}/documents/{}-Price_List.pdf", tenant_id, object_id)
        );
    }

    #[test]
    fn test_validate_source_url() {
        assert!(validate_source_url("https://acme.test/help").is_ok());
        assert!(validate_source_url(" http://acme.test ").is_ok());
        assert!(validate_source_url("ftp://acme.test/file").is_err());
        assert!(validate_source_url("not a url").is_err());
    }

    #[tokio::test]
    async fn test_register_publishes_tenant_and_owner_events() {
        let tenant = fixtures::tenant(Uuid::new_v4());
        let db = fixtures::connect(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[BTreeMap::from([("num_items", Value::BigInt(Some(0)))])]])
                .append_query_results([vec![tenant.clone()]]),
        );
        let broker = Arc::new(InMemoryBroker::new());
        let service = TenantService::new(db, broker.clone());

        let owner_id = Uuid::new_v4();
        let created = service
            .register(
                RegisterTenantRequest {
                    name: "Acme Support".into(),
                    slug: "acme".into(),
                    contact_email: "ops@acme.test".into(),
                    settings: None,
                },
                TenantOwner {
                    user_id: owner_id,
                    email: Some("owner@acme.test".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(created.id, tenant.id);

        let tenant_created = broker.messages_for(routing::TENANT_CREATED);
        assert_eq!(tenant_created.len(), 1);
        assert_eq!(tenant_created[0].event.payload["slug"], "acme");

        let user_created = broker.messages_for(routing::USER_CREATED);
        assert_eq!(user_created.len(), 1);
        assert_eq!(user_created[0].event.tenant_id, Some(tenant.id));
        assert_eq!(user_created[0].event.payload["user_id"], owner_id.to_string());
        assert_eq!(user_created[0].event.payload["email"], "owner@acme.test");
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_input_without_touching_db() {
        let db = fixtures::connect(MockDatabase::new(DatabaseBackend::Postgres));
        let broker = Arc::new(InMemoryBroker::new());
        let service = TenantService::new(db.clone(), broker.clone());
        let owner = TenantOwner {
            user_id: Uuid::new_v4(),
            email: None,
        };

        let err = service
            .register(
                RegisterTenantRequest {
                    name: "Acme".into(),
                    slug: "api".into(),
                    contact_email: "ops@acme.test".into(),
                    settings: None,
                },
                owner.clone(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);

        let err = service
            .register(
                RegisterTenantRequest {
                    name: "Acme".into(),
                    slug: "acme".into(),
                    contact_email: "nope".into(),
                    settings: None,
                },
                owner.clone(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);

        let err = service
            .register(
                RegisterTenantRequest {
                    name: "Acme".into(),
                    slug: "acme".into(),
                    contact_email: "ops@acme.test".into(),
                    settings: Some(serde_json::json!({ "webhook_url": "http://10.0.0.5/hook" })),
                },
                owner,
            )
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);

        drop(service);
        assert!(fixtures::transaction_log(db).is_empty());
        assert!(broker.messages().is_empty());
    }

    #[tokio::test]
    async fn test_upload_stores_object_and_queues_ingestion() {
        let tenant_id = Uuid::new_v4();
        let plan = fixtures::plan("starter", 0, 500);
        let subscription = fixtures::subscription(tenant_id, plan.id, SubscriptionStatus::Active, fixtures::days_from_now(20));
        let document = fixtures::document(tenant_id, 5);
        let mut job = fixtures::ingestion_job(tenant_id, JobStatus::Queued);
        job.document_id = Some(document.id);

        let db = fixtures::connect(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([vec![subscription.clone()]])
                .append_query_results([vec![plan.clone()]])
                .append_query_results([vec![subscription]])
                .append_query_results([vec![plan]])
                .append_query_results([vec![document.clone()]])
                .append_query_results([vec![job.clone()]]),
        );
        let broker = Arc::new(InMemoryBroker::new());
        let store = Arc::new(StubStore::default());
        let service = ingestion(db, broker.clone(), store.clone());

        let (stored, queued) = service
            .upload_document(tenant_id, "faq.pdf", None, b"hello".to_vec())
            .await
            .unwrap();
        assert_eq!(stored.id, document.id);
        assert_eq!(queued.id, job.id);

        let puts = store.puts.lock().unwrap().clone();
        assert_eq!(puts.len(), 1);
        assert!(puts[0].0.starts_with(&format!("tenants/{}/documents/", tenant_id)));
        assert!(puts[0].0.ends_with("-faq.pdf"));
        assert_eq!(puts[0].1, "application/pdf");
        assert_eq!(puts[0].2, 5);

        assert_eq!(broker.messages_for(routing::INGESTION_REQUESTED).len(), 1);
        let added = broker.messages_for(routing::USAGE_DOCUMENT_ADDED);
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].event.payload["bytes"], 5);
    }

    #[tokio::test]
    async fn test_upload_rejects_bad_extension_before_storage() {
        let db = fixtures::connect(MockDatabase::new(DatabaseBackend::Postgres));
        let store = Arc::new(StubStore::default());
        let service = ingestion(db, Arc::new(InMemoryBroker::new()), store.clone());

        assert!(service
            .upload_document(Uuid::new_v4(), "payload.exe", None, vec![1, 2, 3])
            .await
            .is_err());
        assert!(store.puts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_repeated_delete_republishes_with_same_key() {
        let tenant_id = Uuid::new_v4();
        let document = fixtures::document(tenant_id, 2048);
        let mut deleted = document.clone();
        deleted.status = crate::db::entities::document::DocumentStatus::Deleted;

        let db = fixtures::connect(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([vec![document.clone()]])
                .append_query_results([vec![deleted.clone()]])
                .append_query_results([vec![deleted]]),
        );
        let broker = Arc::new(InMemoryBroker::new());
        let store = Arc::new(StubStore::default());
        let service = ingestion(db.clone(), broker.clone(), store.clone());

        service.delete_document(tenant_id, document.id).await.unwrap();
        let again = service.delete_document(tenant_id, document.id).await.unwrap();
        assert_eq!(again.status, crate::db::entities::document::DocumentStatus::Deleted);

        let removed = broker.messages_for(routing::USAGE_DOCUMENT_REMOVED);
        assert_eq!(removed.len(), 2);
        assert_eq!(removed[0].event.payload["bytes"], 2048);
        assert_eq!(removed[0].event.dedup_key(), removed[1].event.dedup_key());
        assert_eq!(removed[0].event.dedup_key(), format!("usage:document-removed:{}", document.id));
        assert_eq!(store.deletes.lock().unwrap().len(), 2);

        // 第二次删除只读取，不再写库
        drop(service);
        let log = fixtures::transaction_log(db);
        assert_eq!(log.len(), 3);
        assert!(format!("{:?}", log[1]).contains("UPDATE"));
        assert!(!format!("{:?}", log[2]).contains("UPDATE"));
    }

    #[tokio::test]
    async fn test_delete_of_already_deleted_document_still_publishes_removal() {
        let tenant_id = Uuid::new_v4();
        let mut deleted = fixtures::document(tenant_id, 512);
        deleted.status = crate::db::entities::document::DocumentStatus::Deleted;

        let db = fixtures::connect(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([vec![deleted.clone()]]),
        );
        let broker = Arc::new(InMemoryBroker::new());
        let store = Arc::new(StubStore::default());
        let service = ingestion(db, broker.clone(), store.clone());

        service.delete_document(tenant_id, deleted.id).await.unwrap();

        let removed = broker.messages_for(routing::USAGE_DOCUMENT_REMOVED);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].event.payload["bytes"], 512);
        assert_eq!(store.deletes.lock().unwrap().clone(), vec![deleted.storage_key]);
    }

    #[tokio::test]
    async fn test_job_status_transitions_are_validated() {
        let tenant_id = Uuid::new_v4();
        let completed = fixtures::ingestion_job(tenant_id, JobStatus::Completed);

        let db = fixtures::connect(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([vec![completed.clone()]]),
        );
        let service = ingestion(db, Arc::new(InMemoryBroker::new()), Arc::new(StubStore::default()));

        let err = service
            .update_job_status(
                tenant_id,
                completed.id,
                JobStatusUpdate {
                    status: JobStatus::Running,
                    error: None,
                    chunks_indexed: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 409);

        assert!(JobStatus::Queued.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Completed));
    }
}
