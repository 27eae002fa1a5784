//! 路由注册
//! 创建所有 API 路由并应用中间件

use axum::{
    extract::{DefaultBodyLimit, Request, State},
    middleware::{from_fn, from_fn_with_state, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::{auth::auth_middleware, error::AppError, handlers, middleware::AppState};

/// 请求体上限（资源批量导入可能较大）
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// 创建应用路由
pub fn create_router(state: Arc<AppState>) -> Router {
    // 公开端点：健康检查、登录、注册
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .route("/login", post(handlers::auth::login))
        .route("/register", post(handlers::auth::register));

    // 需要认证的路由
    let authenticated_routes = Router::new()
        .route("/refresh", post(handlers::auth::refresh))
        .route("/api/v1/types", get(handlers::resource::list_types))
        .route("/api/v1/labels", get(handlers::resource::list_labels))
        .route(
            "/api/v1/resources",
            get(handlers::resource::query_resources)
                .post(handlers::resource::upsert_resources)
                .delete(handlers::resource::delete_resources),
        )
        .route("/api/v1/lease", post(handlers::lease::create_lease))
        .route(
            "/api/v1/lease/{id}",
            get(handlers::lease::get_lease).delete(handlers::lease::release_lease),
        )
        .route_layer(from_fn_with_state(state.clone(), auth_middleware));

    // 组合所有路由
    Router::new()
        .merge(public_routes)
        .merge(authenticated_routes)
        .layer(from_fn_with_state(state.clone(), timeout_middleware))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(from_fn(crate::middleware::request_tracking_middleware))
        .with_state(state)
}

/// 请求超时中间件
async fn timeout_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    tokio::time::timeout(state.config.request_timeout(), next.run(req))
        .await
        .map_err(|_| AppError::Timeout)
}
