// 计费服务
// 套餐、订阅、用量、支付与发票

pub mod handlers;
pub mod invoice;
pub mod payment;
pub mod paystack;
pub mod plans;
pub mod subscription;
pub mod usage;

#[cfg(test)]
mod tests;

pub use handlers::UserCreatedHandler;
pub use invoice::{InvoiceService, InvoiceView, NewInvoice};
pub use payment::{CheckoutRequest, CheckoutResponse, PaymentService, PaymentView, RevenueSummary, WebhookOutcome};
pub use paystack::{PaymentGateway, PaystackClient};
pub use plans::{CreatePlanRequest, PlanService, PlanView, UpdatePlanRequest};
pub use subscription::{CancelSubscriptionRequest, ChangePlanRequest, SubscriptionService, SubscriptionView};
pub use usage::{LimitCheck, UsageCounters, UsageEventHandler, UsageMetric, UsageService, UsageSummary};
