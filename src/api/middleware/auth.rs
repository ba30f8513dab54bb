// 认证中间件
// 验证 Bearer 令牌并把已认证用户放入请求扩展

use actix_web::{
    body::{BoxBody, MessageBody},
    dev::{forward_ready, Payload, Service, ServiceRequest, ServiceResponse, Transform},
    Error, FromRequest, HttpMessage, HttpRequest,
};
use futures::future::{ready, LocalBoxFuture, Ready};
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::errors::{get_request_id, ErrorResponse, PlatformError};
use crate::services::auth::{AuthenticatedUser, TokenValidator};

/// 从 Authorization 头取出 Bearer 令牌
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    let header = header?.trim();
    let (scheme, token) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// JWT 认证中间件
#[derive(Clone)]
pub struct JwtAuthMiddleware {
    validator: Arc<TokenValidator>,
    required_roles: Rc<Vec<String>>,
}

impl JwtAuthMiddleware {
    pub fn new(validator: Arc<TokenValidator>) -> Self {
        Self {
            validator,
            required_roles: Rc::new(Vec::new()),
        }
    }

    /// 要求令牌具备全部角色
    pub fn with_roles(validator: Arc<TokenValidator>, roles: &[&str]) -> Self {
        Self {
            validator,
            required_roles: Rc::new(roles.iter().map(|r| r.to_string()).collect()),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for JwtAuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Transform = JwtAuthMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(JwtAuthMiddlewareService {
            service: Rc::new(service),
            validator: self.validator.clone(),
            required_roles: self.required_roles.clone(),
        }))
    }
}

pub struct JwtAuthMiddlewareService<S> {
    service: Rc<S>,
    validator: Arc<TokenValidator>,
    required_roles: Rc<Vec<String>>,
}

impl<S, B> Service<ServiceRequest> for JwtAuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let validator = self.validator.clone();
        let required_roles = self.required_roles.clone();

        Box::pin(async move {
            let token = bearer_token(
                req.headers()
                    .get(actix_web::http::header::AUTHORIZATION)
                    .and_then(|h| h.to_str().ok()),
            )
            .map(str::to_string);

            let Some(token) = token else {
                return Ok(reject(req, PlatformError::authentication("缺少 Bearer 令牌")));
            };

            let user = match validator.validate(&token).await {
                Ok(user) => user,
                Err(e) => {
                    warn!(path = %req.path(), error = %e, "令牌验证失败");
                    return Ok(reject(req, e));
                }
            };

            if !user.has_roles(&required_roles) {
                warn!(user_id = %user.user_id, required = ?required_roles, "缺少必要角色");
                return Ok(reject(req, PlatformError::authorization("缺少必要角色")));
            }

            debug!(user_id = %user.user_id, tenant_id = ?user.tenant_id, "请求已认证");
            req.extensions_mut().insert(user);

            let response = service.call(req).await?;
            Ok(response.map_into_boxed_body())
        })
    }
}

fn reject(req: ServiceRequest, error: PlatformError) -> ServiceResponse<BoxBody> {
    let mut body = ErrorResponse::from_error(&error);
    if let Some(request_id) = get_request_id(&req) {
        body = body.with_request_id(request_id);
    }
    req.into_response(body.into_http_response())
}

impl FromRequest for AuthenticatedUser {
    type Error = PlatformError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let user = req
            .extensions()
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or_else(|| PlatformError::authentication("请求未认证"));
        ready(user)
    }
}
