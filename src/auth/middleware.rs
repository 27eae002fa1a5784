//! 认证中间件
//! 两种凭据：X-Auth-Email + 邮箱签名，或登录签发的令牌（Bearer 头或 token cookie）

use crate::{auth::jwt::Claims, error::AppError, middleware::AppState, models::Role};
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

pub const AUTH_EMAIL_HEADER: &str = "x-auth-email";
pub const TOKEN_COOKIE: &str = "token";

/// 认证上下文（附加到请求扩展）
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub claims: Claims,
    /// 当前存储中的角色，而非签发时的快照
    pub role: Role,
}

impl AuthContext {
    pub fn email(&self) -> &str {
        &self.claims.email
    }
}

// 实现 FromRequestParts 以便在 handler 中直接提取 AuthContext
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or(AppError::Unauthorized)
    }
}

/// Credentials presented with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Presented {
    /// Base64 RSA signature of `email`
    Signature { email: String, signature: String },
    /// Signed claims issued by login or refresh
    Token(String),
}

/// 从 Authorization 头提取令牌
pub fn extract_token(headers: &HeaderMap) -> Result<String, AppError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or(AppError::Unauthorized)
}

/// Value of cookie `name`, if present.
pub fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

/// Header signature wins over bearer token, bearer token over cookie.
pub fn extract_credentials(headers: &HeaderMap) -> Result<Presented, AppError> {
    let email = headers
        .get(AUTH_EMAIL_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty());

    match (email, extract_token(headers)) {
        (Some(email), Ok(signature)) => Ok(Presented::Signature {
            email: email.to_string(),
            signature,
        }),
        (Some(_), Err(e)) => Err(e),
        (None, Ok(token)) => Ok(Presented::Token(token)),
        (None, Err(_)) => extract_cookie(headers, TOKEN_COOKIE)
            .map(Presented::Token)
            .ok_or(AppError::Unauthorized),
    }
}

/// 认证中间件 - 必须认证
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let presented = extract_credentials(req.headers())?;

    let auth_service = state.auth_service.clone();
    let context =
        tokio::task::spawn_blocking(move || auth_service.authenticate(&presented)).await??;

    tracing::debug!(email = %context.email(), role = %context.role.name, "request authenticated");
    req.extensions_mut().insert(context);

    Ok(next.run(req).await)
}
