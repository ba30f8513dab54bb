// 邮件模板
// `{{变量}}` 占位符渲染，缺少变量视为校验错误

use crate::errors::{PlatformError, PlatformResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

/// 内置邮件模板
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EmailTemplate {
    Welcome,
    TrialStarted,
    InvoiceGenerated,
    PaymentReceived,
    SubscriptionExpired,
}

/// 渲染后的邮件
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
}

impl EmailTemplate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Welcome => "welcome",
            Self::TrialStarted => "trial_started",
            Self::InvoiceGenerated => "invoice_generated",
            Self::PaymentReceived => "payment_received",
            Self::SubscriptionExpired => "subscription_expired",
        }
    }

    fn subject(&self) -> &'static str {
        match self {
            Self::Welcome => "欢迎使用 Chatwise，{{tenant_name}}",
            Self::TrialStarted => "您的 Chatwise 试用已开通",
            Self::InvoiceGenerated => "发票 {{invoice_number}}",
            Self::PaymentReceived => "已收到您的付款 {{reference}}",
            Self::SubscriptionExpired => "{{tenant_name}} 的订阅已到期",
        }
    }

    fn body(&self) -> &'static str {
        match self {
            Self::Welcome => {
                "<p>您好，</p><p>{{tenant_name}} 已成功注册。机器人标识为 <code>{{slug}}</code>，\
                 现在可以上传文档并开始训练您的聊天机器人。</p>"
            }
            Self::TrialStarted => {
                "<p>您好 {{email}}，</p><p>试用期已经开始，期间可以使用全部基础功能。</p>"
            }
            Self::InvoiceGenerated => {
                "<p>发票 <strong>{{invoice_number}}</strong> 已生成。</p>\
                 <p>金额：{{amount}} {{currency}}</p>"
            }
            Self::PaymentReceived => {
                "<p>我们已收到付款 {{amount}} {{currency}}（参考号 {{reference}}），订阅已续期。</p>"
            }
            Self::SubscriptionExpired => {
                "<p>{{tenant_name}} 的订阅已于 {{expired_at}} 到期，机器人将停止回复新消息。</p>\
                 <p>续费后即可恢复服务。</p>"
            }
        }
    }

    pub fn render(&self, variables: &HashMap<String, String>) -> PlatformResult<RenderedEmail> {
        Ok(RenderedEmail {
            subject: render(self.subject(), variables)?,
            html: render(self.body(), variables)?,
        })
    }
}

/// 替换 `{{name}}` 占位符；未闭合的 `{{` 原样保留
pub fn render(template: &str, variables: &HashMap<String, String>) -> PlatformResult<String> {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            output.push_str(&rest[start..]);
            return Ok(output);
        };

        let name = after[..end].trim();
        let value = variables
            .get(name)
            .ok_or_else(|| PlatformError::validation(name, format!("模板变量 {} 缺失", name)))?;
        output.push_str(value);
        rest = &after[end + 2..];
    }

    output.push_str(rest);
    Ok(output)
}

/// JSON 对象转模板变量；非字符串值取其 JSON 文本
pub fn variables_from_json(value: &serde_json::Value) -> HashMap<String, String> {
    let Some(object) = value.as_object() else {
        return HashMap::new();
    };
    object
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| {
            let text = match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), text)
        })
        .collect()
}

/// 最小货币单位格式化为两位小数
pub fn format_amount(amount_minor: i64) -> String {
    let sign = if amount_minor < 0 { "-" } else { "" };
    let amount = amount_minor.unsigned_abs();
    format!("{}{}.{:02}", sign, amount / 100, amount % 100)
}
