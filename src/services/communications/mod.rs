// 通信服务模块
// Brevo 邮件、模板渲染、通知日志与相关事件消费者

pub mod brevo;
pub mod handlers;
pub mod notification;
pub mod templates;

#[cfg(test)]
mod tests;

pub use brevo::{BrevoClient, EmailAddress, EmailSender, OutgoingEmail};
pub use handlers::{
    EmailSendHandler, InvoiceEmailHandler, PaymentReceivedHandler, SubscriptionExpiredHandler,
    TrialStartedEmailHandler, WelcomeEmailHandler,
};
pub use notification::{is_valid_email, LogQuery, NotificationLogView, NotificationService, RetrySummary, SendEmailRequest};
pub use templates::EmailTemplate;
