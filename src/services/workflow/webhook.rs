// 租户 webhook 地址校验
// 只允许 https 与公网地址

use crate::errors::{PlatformError, PlatformResult};
use serde_json::Value;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use url::{Host, Url};

/// 租户设置中的 webhook 地址字段
pub const WEBHOOK_URL_SETTING: &str = "webhook_url";

fn rejected(reason: impl Into<String>) -> PlatformError {
    PlatformError::validation(WEBHOOK_URL_SETTING, reason)
}

fn is_internal_v4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_documentation()
        // 100.64.0.0/10 运营商级 NAT
        || (a == 100 && (b & 0xc0) == 64)
        || a == 0
}

fn is_internal_v6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_internal_v4(v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 唯一本地地址
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 链路本地地址
        || (first & 0xffc0) == 0xfe80
}

/// 是否为内网、回环或链路本地等不可对外回调的地址
pub fn is_internal_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_internal_v4(v4),
        IpAddr::V6(v6) => is_internal_v6(v6),
    }
}

/// 解析并校验 webhook 地址
pub fn validate_webhook_url(raw: &str) -> PlatformResult<Url> {
    let url = Url::parse(raw).map_err(|e| rejected(format!("地址无法解析: {}", e)))?;
    if url.scheme() != "https" {
        return Err(rejected("webhook 地址必须使用 https"));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(rejected("webhook 地址不能包含凭据"));
    }

    match url.host() {
        Some(Host::Ipv4(ip)) if is_internal_v4(ip) => Err(rejected("webhook 地址不能指向内网")),
        Some(Host::Ipv6(ip)) if is_internal_v6(ip) => Err(rejected("webhook 地址不能指向内网")),
        Some(Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            let local = domain == "localhost"
                || [".localhost", ".local", ".internal"].iter().any(|suffix| domain.ends_with(suffix));
            if local {
                Err(rejected("webhook 地址不能指向内网"))
            } else {
                Ok(url)
            }
        }
        Some(_) => Ok(url),
        None => Err(rejected("webhook 地址缺少主机名")),
    }
}

/// 解析域名并拒绝落在内网的地址
pub async fn ensure_public_host(url: &Url) -> PlatformResult<()> {
    let Some(Host::Domain(domain)) = url.host() else {
        return Ok(());
    };
    let port = url.port_or_known_default().unwrap_or(443);
    let addresses = tokio::net::lookup_host((domain, port))
        .await
        .map_err(|e| PlatformError::external_service("webhook", format!("无法解析 {}: {}", domain, e)))?;
    for address in addresses {
        if is_internal_ip(address.ip()) {
            return Err(rejected(format!("{} 解析到内网地址", domain)));
        }
    }
    Ok(())
}

/// 从租户设置读取 webhook 地址；未配置时返回 `None`
pub fn tenant_webhook_url(settings: &Value) -> PlatformResult<Option<Url>> {
    match settings.get(WEBHOOK_URL_SETTING) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(raw)) if raw.is_empty() => Ok(None),
        Some(Value::String(raw)) => validate_webhook_url(raw).map(Some),
        Some(_) => Err(rejected("webhook 地址必须是字符串")),
    }
}
