// 测试数据构造
// 服务层单元测试共用的实体模型

use crate::db::entities::*;
use chrono::{DateTime, Duration, FixedOffset, Utc};
use sea_orm::{DatabaseConnection, MockDatabase, Transaction};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// 模拟数据库连接，按服务持有的方式共享
pub fn connect(db: MockDatabase) -> Arc<DatabaseConnection> {
    Arc::new(db.into_connection())
}

/// 取出执行过的语句；调用前需先释放持有连接的服务
pub fn transaction_log(db: Arc<DatabaseConnection>) -> Vec<Transaction> {
    Arc::try_unwrap(db)
        .ok()
        .expect("连接仍被其他服务持有")
        .into_transaction_log()
}

pub fn now() -> DateTime<FixedOffset> {
    Utc::now().into()
}

pub fn days_from_now(days: i64) -> DateTime<FixedOffset> {
    (Utc::now() + Duration::days(days)).into()
}

pub fn tenant(id: Uuid) -> tenant::Model {
    tenant::Model {
        id,
        name: "Acme Support".into(),
        slug: "acme".into(),
        status: tenant::TenantStatus::Active,
        contact_email: "ops@acme.test".into(),
        owner_user_id: Uuid::new_v4(),
        settings: json!({}),
        created_at: now(),
        updated_at: now(),
    }
}

pub fn plan(code: &str, price_minor: i64, max_messages: i64) -> plan::Model {
    plan::Model {
        id: Uuid::new_v4(),
        code: code.into(),
        name: code.to_uppercase(),
        description: None,
        price_minor,
        currency: "NGN".into(),
        billing_interval: plan::BillingInterval::Monthly,
        limits: json!({ "max_messages": max_messages, "max_documents": 10, "max_storage_bytes": 1_000_000 }),
        is_active: true,
        paystack_plan_code: None,
        created_at: now(),
        updated_at: now(),
    }
}

pub fn subscription(
    tenant_id: Uuid,
    plan_id: Uuid,
    status: subscription::SubscriptionStatus,
    period_end: DateTime<FixedOffset>,
) -> subscription::Model {
    subscription::Model {
        id: Uuid::new_v4(),
        tenant_id,
        plan_id,
        status,
        current_period_start: days_from_now(-30),
        current_period_end: period_end,
        cancel_at_period_end: false,
        usage: json!({ "messages": 0, "documents": 0, "storage_bytes": 0 }),
        created_at: days_from_now(-30),
        updated_at: days_from_now(-30),
    }
}

pub fn payment(tenant_id: Uuid, plan_id: Uuid, reference: &str, amount_minor: i64) -> payment::Model {
    payment::Model {
        id: Uuid::new_v4(),
        tenant_id,
        plan_id,
        reference: reference.into(),
        amount_minor,
        currency: "NGN".into(),
        status: payment::PaymentStatus::Pending,
        provider: "paystack".into(),
        email: "billing@acme.test".into(),
        authorization_url: Some("https://checkout.paystack.test/abc".into()),
        paid_at: None,
        metadata: json!({}),
        created_at: now(),
        updated_at: now(),
    }
}

pub fn invoice(tenant_id: Uuid, status: invoice::InvoiceStatus) -> invoice::Model {
    invoice::Model {
        id: Uuid::new_v4(),
        tenant_id,
        subscription_id: None,
        payment_id: None,
        number: "INV-202405-ABCDEF12".into(),
        amount_minor: 1_500_000,
        currency: "NGN".into(),
        status,
        period_start: now(),
        period_end: days_from_now(30),
        issued_at: now(),
        due_at: None,
        paid_at: None,
        line_items: json!([]),
        created_at: now(),
        updated_at: now(),
    }
}

pub fn chat_session(tenant_id: Uuid, status: chat_session::SessionStatus) -> chat_session::Model {
    chat_session::Model {
        id: Uuid::new_v4(),
        tenant_id,
        visitor_id: "visitor-1".into(),
        channel: "web".into(),
        status,
        started_at: now(),
        ended_at: None,
        message_count: 0,
        metadata: json!({}),
        created_at: now(),
        updated_at: now(),
    }
}

pub fn chat_message(
    tenant_id: Uuid,
    session_id: Uuid,
    role: chat_message::MessageRole,
    content: &str,
) -> chat_message::Model {
    chat_message::Model {
        id: Uuid::new_v4(),
        tenant_id,
        session_id,
        role,
        content: content.into(),
        confidence: None,
        sources: json!([]),
        created_at: now(),
    }
}

pub fn knowledge_gap(tenant_id: Uuid, normalized: &str, occurrences: i32, avg_confidence: f64) -> knowledge_gap::Model {
    knowledge_gap::Model {
        id: Uuid::new_v4(),
        tenant_id,
        normalized_question: normalized.into(),
        sample_question: normalized.into(),
        occurrences,
        avg_confidence,
        status: knowledge_gap::GapStatus::Open,
        resolution_note: None,
        first_seen_at: now(),
        last_seen_at: now(),
        resolved_at: None,
        created_at: now(),
        updated_at: now(),
    }
}

pub fn notification_log(key: &str, status: notification_log::NotificationStatus, attempts: i32) -> notification_log::Model {
    notification_log::Model {
        id: Uuid::new_v4(),
        tenant_id: None,
        channel: "email".into(),
        template: "welcome".into(),
        recipient: "owner@acme.test".into(),
        subject: "Welcome".into(),
        body: "<p>Hello</p>".into(),
        status,
        provider_message_id: None,
        attempts,
        last_error: None,
        idempotency_key: key.into(),
        sent_at: None,
        created_at: now(),
        updated_at: now(),
    }
}

pub fn workflow_execution(
    tenant_id: Uuid,
    key: &str,
    status: workflow_execution::ExecutionStatus,
) -> workflow_execution::Model {
    workflow_execution::Model {
        id: Uuid::new_v4(),
        tenant_id,
        workflow_key: key.into(),
        trigger_event: None,
        status,
        input: json!({}),
        output: json!({}),
        current_step: 0,
        total_steps: 2,
        attempt: 1,
        max_attempts: 3,
        error: None,
        started_at: None,
        completed_at: None,
        created_at: now(),
        updated_at: now(),
    }
}

pub fn document(tenant_id: Uuid, size_bytes: i64) -> document::Model {
    document::Model {
        id: Uuid::new_v4(),
        tenant_id,
        file_name: "faq.pdf".into(),
        storage_key: format!("tenants/{}/documents/faq.pdf", tenant_id),
        content_type: "application/pdf".into(),
        size_bytes,
        status: document::DocumentStatus::Active,
        created_at: now(),
        updated_at: now(),
    }
}

pub fn ingestion_job(tenant_id: Uuid, status: ingestion_job::JobStatus) -> ingestion_job::Model {
    ingestion_job::Model {
        id: Uuid::new_v4(),
        tenant_id,
        document_id: None,
        source_type: ingestion_job::SourceType::Url,
        source: "https://acme.test/help".into(),
        status,
        error: None,
        chunks_indexed: 0,
        started_at: None,
        completed_at: None,
        created_at: now(),
        updated_at: now(),
    }
}
