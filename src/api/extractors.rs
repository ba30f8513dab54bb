// API 请求提取器
// 从已认证用户推导租户范围与管理员身份

use actix_web::{dev::Payload, FromRequest, HttpMessage, HttpRequest};
use futures::future::{ready, Ready};
use uuid::Uuid;

use crate::errors::{PlatformError, PlatformResult};
use crate::services::auth::AuthenticatedUser;

/// 管理员指定目标租户的请求头
pub const TENANT_HEADER: &str = "X-Tenant-ID";

/// 当前请求作用的租户
#[derive(Debug, Clone)]
pub struct TenantScope {
    pub tenant_id: Uuid,
    pub user: AuthenticatedUser,
}

fn authenticated(req: &HttpRequest) -> PlatformResult<AuthenticatedUser> {
    req.extensions()
        .get::<AuthenticatedUser>()
        .cloned()
        .ok_or_else(|| PlatformError::authentication("请求未认证"))
}

/// 请求头中的租户优先，但必须有访问权；否则使用令牌租户
pub fn resolve_tenant(user: &AuthenticatedUser, header: Option<&str>) -> PlatformResult<Uuid> {
    match header {
        Some(raw) => {
            let tenant_id = Uuid::parse_str(raw.trim())
                .map_err(|_| PlatformError::validation(TENANT_HEADER, "不是合法的租户 ID"))?;
            user.ensure_tenant_access(tenant_id)?;
            Ok(tenant_id)
        }
        None => user.require_tenant(),
    }
}

impl FromRequest for TenantScope {
    type Error = PlatformError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let scope = authenticated(req).and_then(|user| {
            let header = req.headers().get(TENANT_HEADER).and_then(|h| h.to_str().ok());
            let tenant_id = resolve_tenant(&user, header)?;
            Ok(TenantScope { tenant_id, user })
        });
        ready(scope)
    }
}

/// 管理员
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthenticatedUser);

impl FromRequest for AdminUser {
    type Error = PlatformError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let admin = authenticated(req).and_then(|user| {
            if user.is_admin() {
                Ok(AdminUser(user))
            } else {
                Err(PlatformError::authorization("需要管理员权限"))
            }
        });
        ready(admin)
    }
}
