//! 认证相关的 HTTP 处理器：登录、注册、刷新

use crate::{
    auth::{middleware::TOKEN_COOKIE, AuthContext, IssuedToken},
    error::AppError,
    handlers::{blocking, parse_body},
    middleware::AppState,
    models::{LoginRequest, RegisterRequest, TokenResponse, User},
};
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

/// 登录：校验邮箱和密码，签发令牌并写入 cookie
pub async fn login(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, AppError> {
    let req: LoginRequest = parse_body(&body)?;

    let auth_service = state.auth_service.clone();
    let (user, issued) = blocking(move || auth_service.login(&req)).await?;

    token_response(&state, issued, Some(user))
}

/// 注册：新用户默认只读
pub async fn register(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let req: RegisterRequest = parse_body(&body)?;

    let auth_service = state.auth_service.clone();
    let user = blocking(move || auth_service.register(&req)).await?;

    Ok((StatusCode::CREATED, Json(user)))
}

/// 刷新令牌：用当前身份重新签发
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
) -> Result<Response, AppError> {
    let issued = state.auth_service.refresh(&auth_context.claims)?;
    token_response(&state, issued, None)
}

fn token_response(
    state: &AppState,
    issued: IssuedToken,
    user: Option<User>,
) -> Result<Response, AppError> {
    let cookie = token_cookie(&issued, state.config.server.tls.is_some())?;

    let body = TokenResponse {
        token: issued.token,
        expires_in: issued.expires_in,
        user,
    };
    Ok(([(header::SET_COOKIE, cookie)], Json(body)).into_response())
}

fn token_cookie(issued: &IssuedToken, secure: bool) -> Result<HeaderValue, AppError> {
    let mut cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Strict; Max-Age={}",
        TOKEN_COOKIE, issued.token, issued.expires_in
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie).map_err(|e| AppError::internal(format!("bad cookie value: {}", e)))
}
