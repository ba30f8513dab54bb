// 认证服务
// 基于授权服务器 JWKS 的 Bearer 令牌验证与租户访问控制

pub mod jwks;
pub mod token_cache;
pub mod validator;

#[cfg(test)]
pub(crate) mod testing;
#[cfg(test)]
mod tests;

pub use jwks::{Jwk, JwkSet, JwksProvider};
pub use token_cache::TokenCache;
pub use validator::TokenValidator;

use crate::errors::{PlatformError, PlatformResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 管理员角色，可以访问任意租户
pub const ADMIN_ROLE: &str = "admin";

/// 访问令牌声明
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub tenant_id: Option<Uuid>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub iss: Option<String>,
}

/// 已认证用户
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub tenant_id: Option<Uuid>,
    pub email: Option<String>,
    pub roles: Vec<String>,
}

impl From<Claims> for AuthenticatedUser {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            tenant_id: claims.tenant_id,
            email: claims.email,
            roles: claims.roles,
        }
    }
}

impl AuthenticatedUser {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(ADMIN_ROLE)
    }

    /// 令牌租户一致或具有管理员角色
    pub fn can_access_tenant(&self, tenant_id: Uuid) -> bool {
        self.is_admin() || self.tenant_id == Some(tenant_id)
    }

    pub fn ensure_tenant_access(&self, tenant_id: Uuid) -> PlatformResult<()> {
        if self.can_access_tenant(tenant_id) {
            Ok(())
        } else {
            Err(PlatformError::authorization("无权访问该租户的资源"))
        }
    }

    /// 令牌所属租户
    pub fn require_tenant(&self) -> PlatformResult<Uuid> {
        self.tenant_id
            .ok_or_else(|| PlatformError::authorization("令牌未关联租户"))
    }

    /// 所有要求的角色都具备（管理员除外）
    pub fn has_roles(&self, required: &[String]) -> bool {
        self.is_admin() || required.iter().all(|role| self.has_role(role))
    }
}
