//! HTTP 中间件与应用状态
//! 请求追踪（trace_id / request_id、指标、完成日志）

use crate::{
    auth::{JwtService, PasswordHasher},
    config::AppConfig,
    error::AppError,
    repository::{IndexedStore, Store},
    scheduler::Scheduler,
    services::{AuthService, PermissionService},
};
use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

/// 应用状态
///
/// 服务都以 Arc 共享；存储是资源记录的唯一写入者，调度器与认证服务都经由它读写。
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn Store>,
    pub scheduler: Scheduler,
    pub auth_service: Arc<AuthService>,
    pub permission_service: Arc<PermissionService>,
    /// 通知调度器、到期监视器停止
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Opens the store, wires the services and seeds the admin user.
    /// The scheduler is created but not started.
    pub fn build(config: AppConfig, shutdown: CancellationToken) -> Result<Arc<Self>, AppError> {
        let (store, load_error) =
            IndexedStore::open(&config.store.root_dir, config.validation_context())?;
        if let Some(e) = load_error {
            // 单个文件损坏不阻止启动
            tracing::warn!(error = %e, "store loaded with errors");
        }
        tracing::info!(
            root = %config.store.root_dir.display(),
            resources = store.len(),
            "store opened"
        );
        let store: Arc<dyn Store> = Arc::new(store);

        let jwt_service = Arc::new(JwtService::from_config(&config)?);
        let hasher = PasswordHasher::from_config(&config.security.argon2)?;
        let auth_service = Arc::new(AuthService::new(store.clone(), jwt_service, hasher));
        auth_service.seed_admin(&config.admin)?;

        let scheduler = Scheduler::new(store.clone(), config.scheduler_config(), shutdown.clone());

        Ok(Arc::new(Self {
            config,
            store,
            scheduler,
            auth_service,
            permission_service: Arc::new(PermissionService::new()),
            shutdown,
        }))
    }
}

/// 请求追踪中间件
/// 为每个请求生成 trace_id 和 request_id，并记录指标
pub async fn request_tracking_middleware(req: Request, next: Next) -> Response {
    let trace_id = extract_or_generate_trace_id(req.headers());
    let request_id = Uuid::new_v4().to_string();

    let method = req.method().to_string();
    let uri = req.uri().path().to_string();

    let span = tracing::info_span!(
        "http_request",
        trace_id = %trace_id,
        request_id = %request_id,
        method = %method,
        uri = %uri,
    );

    async move {
        let start = Instant::now();

        let mut response = next.run(req).await;

        let elapsed = start.elapsed();
        let status = response.status().as_u16();

        // 指标标签只用有限取值
        let method_name = match method.as_str() {
            "GET" => "GET",
            "POST" => "POST",
            "DELETE" => "DELETE",
            _ => "OTHER",
        };
        let status_class = match status {
            200..=299 => "2xx",
            400..=499 => "4xx",
            500..=599 => "5xx",
            _ => "other",
        };
        metrics::counter!("http_requests_total", "method" => method_name, "status" => status_class)
            .increment(1);
        metrics::histogram!("http_request_duration_seconds").record(elapsed.as_secs_f64());

        tracing::info!(
            method = %method,
            uri = %uri,
            status = status,
            elapsed_ms = elapsed.as_millis() as u64,
            "Request completed"
        );

        // 在响应头中回写 trace_id / request_id
        if let Ok(value) = HeaderValue::from_str(&trace_id) {
            response.headers_mut().insert("x-trace-id", value);
        }
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert("x-request-id", value);
        }

        response
    }
    .instrument(span)
    .await
}

/// 从请求头中提取或生成 trace_id
fn extract_or_generate_trace_id(headers: &HeaderMap) -> String {
    headers
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}
