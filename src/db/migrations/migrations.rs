// 数据库迁移脚本定义

use super::Migration;

/// 获取所有迁移，按版本顺序
pub fn get_all_migrations() -> Vec<Migration> {
    vec![
        create_tenants_and_plans(),
        create_billing_tables(),
        create_chat_tables(),
        create_quality_tables(),
        create_notification_and_workflow_tables(),
        create_document_tables(),
        create_processed_events_table(),
    ]
}

fn migration(version: &str, name: &str, description: &str, up_sql: &str, down_sql: &str) -> Migration {
    Migration {
        version: version.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        up_sql: up_sql.to_string(),
        down_sql: down_sql.to_string(),
    }
}

fn create_tenants_and_plans() -> Migration {
    migration(
        "20240501_000001",
        "create_tenants_and_plans",
        "创建租户表和套餐表",
        r#"
            CREATE TABLE tenants (
                id UUID PRIMARY KEY,
                name VARCHAR(255) NOT NULL,
                slug VARCHAR(63) NOT NULL UNIQUE,
                status VARCHAR(32) NOT NULL DEFAULT 'active',
                contact_email VARCHAR(255) NOT NULL,
                owner_user_id UUID NOT NULL,
                settings JSONB NOT NULL DEFAULT '{}',
                created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX idx_tenants_status ON tenants(status);

            CREATE TABLE plans (
                id UUID PRIMARY KEY,
                code VARCHAR(64) NOT NULL UNIQUE,
                name VARCHAR(255) NOT NULL,
                description TEXT,
                price_minor BIGINT NOT NULL DEFAULT 0,
                currency VARCHAR(3) NOT NULL,
                billing_interval VARCHAR(32) NOT NULL DEFAULT 'monthly',
                limits JSONB NOT NULL DEFAULT '{}',
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                paystack_plan_code VARCHAR(128),
                created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
        "#,
        r#"
            DROP TABLE IF EXISTS plans;
            DROP TABLE IF EXISTS tenants
        "#,
    )
}

fn create_billing_tables() -> Migration {
    migration(
        "20240501_000002",
        "create_billing_tables",
        "创建订阅、支付和发票表",
        r#"
            CREATE TABLE subscriptions (
                id UUID PRIMARY KEY,
                tenant_id UUID NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                plan_id UUID NOT NULL REFERENCES plans(id),
                status VARCHAR(32) NOT NULL,
                current_period_start TIMESTAMPTZ NOT NULL,
                current_period_end TIMESTAMPTZ NOT NULL,
                cancel_at_period_end BOOLEAN NOT NULL DEFAULT FALSE,
                usage JSONB NOT NULL DEFAULT '{}',
                created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX idx_subscriptions_tenant ON subscriptions(tenant_id, created_at DESC);
            CREATE INDEX idx_subscriptions_status_end ON subscriptions(status, current_period_end);

            CREATE TABLE payments (
                id UUID PRIMARY KEY,
                tenant_id UUID NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                plan_id UUID NOT NULL REFERENCES plans(id),
                reference VARCHAR(64) NOT NULL UNIQUE,
                amount_minor BIGINT NOT NULL,
                currency VARCHAR(3) NOT NULL,
                status VARCHAR(32) NOT NULL,
                provider VARCHAR(32) NOT NULL DEFAULT 'paystack',
                email VARCHAR(255) NOT NULL,
                authorization_url TEXT,
                paid_at TIMESTAMPTZ,
                metadata JSONB NOT NULL DEFAULT '{}',
                created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX idx_payments_tenant ON payments(tenant_id);
            CREATE INDEX idx_payments_status ON payments(status, paid_at);

            CREATE TABLE invoices (
                id UUID PRIMARY KEY,
                tenant_id UUID NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                subscription_id UUID REFERENCES subscriptions(id),
                payment_id UUID REFERENCES payments(id),
                number VARCHAR(32) NOT NULL UNIQUE,
                amount_minor BIGINT NOT NULL,
                currency VARCHAR(3) NOT NULL,
                status VARCHAR(32) NOT NULL,
                period_start TIMESTAMPTZ NOT NULL,
                period_end TIMESTAMPTZ NOT NULL,
                issued_at TIMESTAMPTZ NOT NULL,
                due_at TIMESTAMPTZ,
                paid_at TIMESTAMPTZ,
                line_items JSONB NOT NULL DEFAULT '[]',
                created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX idx_invoices_tenant ON invoices(tenant_id, issued_at DESC)
        "#,
        r#"
            DROP TABLE IF EXISTS invoices;
            DROP TABLE IF EXISTS payments;
            DROP TABLE IF EXISTS subscriptions
        "#,
    )
}

fn create_chat_tables() -> Migration {
    migration(
        "20240501_000003",
        "create_chat_tables",
        "创建聊天会话和消息表",
        r#"
            CREATE TABLE chat_sessions (
                id UUID PRIMARY KEY,
                tenant_id UUID NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                visitor_id VARCHAR(255) NOT NULL,
                channel VARCHAR(32) NOT NULL DEFAULT 'web',
                status VARCHAR(32) NOT NULL DEFAULT 'open',
                started_at TIMESTAMPTZ NOT NULL,
                ended_at TIMESTAMPTZ,
                message_count INTEGER NOT NULL DEFAULT 0,
                metadata JSONB NOT NULL DEFAULT '{}',
                created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX idx_chat_sessions_tenant ON chat_sessions(tenant_id, started_at DESC);

            CREATE TABLE chat_messages (
                id UUID PRIMARY KEY,
                tenant_id UUID NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                session_id UUID NOT NULL REFERENCES chat_sessions(id) ON DELETE CASCADE,
                role VARCHAR(32) NOT NULL,
                content TEXT NOT NULL,
                confidence DOUBLE PRECISION,
                sources JSONB NOT NULL DEFAULT '[]',
                created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX idx_chat_messages_session ON chat_messages(session_id, created_at);
            CREATE INDEX idx_chat_messages_tenant_day ON chat_messages(tenant_id, created_at)
        "#,
        r#"
            DROP TABLE IF EXISTS chat_messages;
            DROP TABLE IF EXISTS chat_sessions
        "#,
    )
}

fn create_quality_tables() -> Migration {
    migration(
        "20240501_000004",
        "create_quality_tables",
        "创建回答质量指标和知识缺口表",
        r#"
            CREATE TABLE quality_metrics (
                id UUID PRIMARY KEY,
                tenant_id UUID NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                session_id UUID NOT NULL,
                message_id UUID NOT NULL UNIQUE,
                question TEXT NOT NULL,
                confidence DOUBLE PRECISION NOT NULL,
                relevance DOUBLE PRECISION,
                helpful BOOLEAN,
                rating INTEGER,
                flagged BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX idx_quality_metrics_tenant ON quality_metrics(tenant_id, created_at);

            CREATE TABLE knowledge_gaps (
                id UUID PRIMARY KEY,
                tenant_id UUID NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                normalized_question TEXT NOT NULL,
                sample_question TEXT NOT NULL,
                occurrences INTEGER NOT NULL DEFAULT 1,
                avg_confidence DOUBLE PRECISION NOT NULL,
                status VARCHAR(32) NOT NULL DEFAULT 'open',
                resolution_note TEXT,
                first_seen_at TIMESTAMPTZ NOT NULL,
                last_seen_at TIMESTAMPTZ NOT NULL,
                resolved_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (tenant_id, normalized_question)
            )
        "#,
        r#"
            DROP TABLE IF EXISTS knowledge_gaps;
            DROP TABLE IF EXISTS quality_metrics
        "#,
    )
}

fn create_notification_and_workflow_tables() -> Migration {
    migration(
        "20240501_000005",
        "create_notification_and_workflow_tables",
        "创建通知日志和工作流执行表",
        r#"
            CREATE TABLE notification_logs (
                id UUID PRIMARY KEY,
                tenant_id UUID,
                channel VARCHAR(32) NOT NULL DEFAULT 'email',
                template VARCHAR(64) NOT NULL,
                recipient VARCHAR(255) NOT NULL,
                subject TEXT NOT NULL,
                body TEXT NOT NULL,
                status VARCHAR(32) NOT NULL,
                provider_message_id VARCHAR(255),
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                idempotency_key VARCHAR(255) NOT NULL UNIQUE,
                sent_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX idx_notification_logs_tenant ON notification_logs(tenant_id, created_at DESC);
            CREATE INDEX idx_notification_logs_status ON notification_logs(status, attempts);

            CREATE TABLE workflow_executions (
                id UUID PRIMARY KEY,
                tenant_id UUID NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                workflow_key VARCHAR(64) NOT NULL,
                trigger_event VARCHAR(64),
                status VARCHAR(32) NOT NULL,
                input JSONB NOT NULL DEFAULT '{}',
                output JSONB NOT NULL DEFAULT '{}',
                current_step INTEGER NOT NULL DEFAULT 0,
                total_steps INTEGER NOT NULL,
                attempt INTEGER NOT NULL DEFAULT 1,
                max_attempts INTEGER NOT NULL,
                error TEXT,
                started_at TIMESTAMPTZ,
                completed_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX idx_workflow_executions_tenant ON workflow_executions(tenant_id, created_at DESC)
        "#,
        r#"
            DROP TABLE IF EXISTS workflow_executions;
            DROP TABLE IF EXISTS notification_logs
        "#,
    )
}

fn create_document_tables() -> Migration {
    migration(
        "20240501_000006",
        "create_document_tables",
        "创建文档和摄取任务表",
        r#"
            CREATE TABLE documents (
                id UUID PRIMARY KEY,
                tenant_id UUID NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                file_name VARCHAR(255) NOT NULL,
                storage_key TEXT NOT NULL,
                content_type VARCHAR(255) NOT NULL,
                size_bytes BIGINT NOT NULL,
                status VARCHAR(32) NOT NULL DEFAULT 'active',
                created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX idx_documents_tenant ON documents(tenant_id, created_at DESC);

            CREATE TABLE ingestion_jobs (
                id UUID PRIMARY KEY,
                tenant_id UUID NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                document_id UUID REFERENCES documents(id) ON DELETE SET NULL,
                source_type VARCHAR(32) NOT NULL,
                source TEXT NOT NULL,
                status VARCHAR(32) NOT NULL,
                error TEXT,
                chunks_indexed INTEGER NOT NULL DEFAULT 0,
                started_at TIMESTAMPTZ,
                completed_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX idx_ingestion_jobs_tenant ON ingestion_jobs(tenant_id, created_at DESC)
        "#,
        r#"
            DROP TABLE IF EXISTS ingestion_jobs;
            DROP TABLE IF EXISTS documents
        "#,
    )
}

fn create_processed_events_table() -> Migration {
    migration(
        "20240501_000007",
        "create_processed_events_table",
        "创建消费者幂等记录表",
        r#"
            CREATE TABLE processed_events (
                id VARCHAR(512) PRIMARY KEY,
                consumer VARCHAR(128) NOT NULL,
                processed_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX idx_processed_events_processed_at ON processed_events(processed_at)
        "#,
        "DROP TABLE IF EXISTS processed_events",
    )
}
