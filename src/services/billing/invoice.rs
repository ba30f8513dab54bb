// 发票服务
// 生成、查询与作废发票

use crate::db::entities::{invoice, invoice::InvoiceLineItem, invoice::InvoiceStatus, prelude::*};
use crate::errors::{PlatformError, PlatformResult};
use chatwise_common::{PaginatedResponse, PaginationParams};
use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::*;
use serde::Serialize;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use std::sync::Arc;

/// 发票编号：`INV-YYYYMM-XXXXXXXX`
pub fn invoice_number(issued_at: DateTime<Utc>, id: Uuid) -> String {
    let suffix: String = id.simple().to_string().chars().take(8).collect();
    format!("INV-{}-{}", issued_at.format("%Y%m"), suffix.to_uppercase())
}

/// 新发票
#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub tenant_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub payment_id: Option<Uuid>,
    pub currency: String,
    pub status: InvoiceStatus,
    pub period_start: DateTime<FixedOffset>,
    pub period_end: DateTime<FixedOffset>,
    pub line_items: Vec<InvoiceLineItem>,
}

/// 发票视图
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct InvoiceView {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub number: String,
    pub amount_minor: i64,
    pub currency: String,
    pub status: InvoiceStatus,
    pub period_start: DateTime<FixedOffset>,
    pub period_end: DateTime<FixedOffset>,
    pub issued_at: DateTime<FixedOffset>,
    pub paid_at: Option<DateTime<FixedOffset>>,
    pub line_items: Vec<InvoiceLineItem>,
}

impl From<invoice::Model> for InvoiceView {
    fn from(model: invoice::Model) -> Self {
        Self {
            line_items: serde_json::from_value(model.line_items.clone()).unwrap_or_default(),
            id: model.id,
            tenant_id: model.tenant_id,
            number: model.number,
            amount_minor: model.amount_minor,
            currency: model.currency,
            status: model.status,
            period_start: model.period_start,
            period_end: model.period_end,
            issued_at: model.issued_at,
            paid_at: model.paid_at,
        }
    }
}

/// 发票服务
pub struct InvoiceService {
    db: Arc<DatabaseConnection>,
}

impl InvoiceService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// 在给定连接或事务内生成发票
    #[instrument(skip(db, new), fields(tenant_id = %new.tenant_id))]
    pub async fn generate_in<C: ConnectionTrait>(db: &C, new: NewInvoice) -> PlatformResult<invoice::Model> {
        if new.line_items.is_empty() {
            return Err(PlatformError::validation("line_items", "发票至少需要一个行项目"));
        }

        let now = Utc::now();
        let id = Uuid::new_v4();
        let amount_minor = new.line_items.iter().map(|item| item.amount_minor).sum();
        let paid_at = (new.status == InvoiceStatus::Paid).then(|| DateTime::<FixedOffset>::from(now));

        let model = invoice::ActiveModel {
            id: Set(id),
            tenant_id: Set(new.tenant_id),
            subscription_id: Set(new.subscription_id),
            payment_id: Set(new.payment_id),
            number: Set(invoice_number(now, id)),
            amount_minor: Set(amount_minor),
            currency: Set(new.currency),
            status: Set(new.status),
            period_start: Set(new.period_start),
            period_end: Set(new.period_end),
            issued_at: Set(now.into()),
            due_at: Set(None),
            paid_at: Set(paid_at),
            line_items: Set(serde_json::to_value(&new.line_items)?),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(db)
        .await?;

        info!(invoice_id = %model.id, number = %model.number, amount_minor, "发票已生成");
        Ok(model)
    }

    pub async fn list(&self, tenant_id: Uuid, pagination: &PaginationParams) -> PlatformResult<PaginatedResponse<invoice::Model>> {
        let paginator = Invoice::find()
            .filter(invoice::Column::TenantId.eq(tenant_id))
            .order_by_desc(invoice::Column::IssuedAt)
            .paginate(self.db.as_ref(), pagination.page_size());
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(pagination.page_index()).await?;
        Ok(PaginatedResponse::new(items, total, pagination.page(), pagination.page_size()))
    }

    /// 某笔支付对应的发票
    pub async fn find_by_payment(&self, payment_id: Uuid) -> PlatformResult<Option<invoice::Model>> {
        Ok(Invoice::find()
            .filter(invoice::Column::PaymentId.eq(payment_id))
            .one(self.db.as_ref())
            .await?)
    }

    pub async fn get(&self, tenant_id: Uuid, invoice_id: Uuid) -> PlatformResult<invoice::Model> {
        Invoice::find_by_id(invoice_id)
            .filter(invoice::Column::TenantId.eq(tenant_id))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| PlatformError::not_found(format!("发票 {}", invoice_id)))
    }

    /// 作废发票；已付款的发票不能作废
    #[instrument(skip(self))]
    pub async fn void(&self, tenant_id: Uuid, invoice_id: Uuid) -> PlatformResult<invoice::Model> {
        let existing = self.get(tenant_id, invoice_id).await?;
        match existing.status {
            InvoiceStatus::Paid => return Err(PlatformError::conflict("已付款的发票不能作废")),
            InvoiceStatus::Void => return Ok(existing),
            InvoiceStatus::Draft | InvoiceStatus::Open => {}
        }

        let mut active: invoice::ActiveModel = existing.into();
        active.status = Set(InvoiceStatus::Void);
        active.updated_at = Set(Utc::now().into());
        let model = active.update(self.db.as_ref()).await?;

        info!(invoice_id = %invoice_id, "发票已作废");
        Ok(model)
    }
}
