//! 租约 HTTP 处理器
//! 提交（校验、持久化、入队）、查看与提前释放

use crate::{
    auth::AuthContext,
    error::AppError,
    handlers::{blocking, parse_body},
    middleware::AppState,
    models::{factory::LEASE, Lease, Operation, ResourceReq},
};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// `POST /lease` body
#[derive(Debug, Deserialize)]
pub struct LeaseRequest {
    /// Lease owner; defaults to the caller
    #[serde(default)]
    pub email: Option<String>,
    #[serde(with = "crate::models::lease::duration_str")]
    pub duration: Duration,
    pub request: Vec<ResourceReq>,
}

/// 提交租约
pub async fn create_lease(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let req: LeaseRequest = parse_body(&body)?;

    let owner = req
        .email
        .as_deref()
        .map(str::trim)
        .filter(|email| !email.is_empty())
        .unwrap_or(auth_context.email())
        .to_string();

    // 为他人申请租约需要 system.lease 的创建权限
    if !owner.eq_ignore_ascii_case(auth_context.email()) {
        state
            .permission_service
            .require(&auth_context, Operation::Create, LEASE)?;
    }
    for requirement in &req.request {
        state
            .permission_service
            .require(&auth_context, Operation::Read, &requirement.kind)?;
    }

    let lease = Lease::new(&owner, req.duration, req.request);

    let scheduler = state.scheduler.clone();
    let lease = blocking(move || Ok(scheduler.submit(lease)?)).await?;

    Ok((StatusCode::CREATED, Json(lease)))
}

/// 查看租约：所有者或对 system.lease 有读权限
pub async fn get_lease(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Path(id): Path<String>,
) -> Result<Json<Lease>, AppError> {
    let lease = load_lease(&state, &id)?;
    authorize(&state, &auth_context, &lease, Operation::Read)?;
    Ok(Json(lease))
}

/// 提前释放租约：所有者或对 system.lease 有删除权限
pub async fn release_lease(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Path(id): Path<String>,
) -> Result<Json<Lease>, AppError> {
    let lease = load_lease(&state, &id)?;
    authorize(&state, &auth_context, &lease, Operation::Delete)?;

    let scheduler = state.scheduler.clone();
    let released = blocking(move || Ok(scheduler.cancel(&id)?)).await?;

    tracing::info!(
        lease_id = %released.id(),
        email = %auth_context.email(),
        "lease released on request"
    );
    Ok(Json(released))
}

fn load_lease(state: &AppState, id: &str) -> Result<Lease, AppError> {
    state
        .store
        .get(id)
        .and_then(|r| r.as_lease().cloned())
        .ok_or_else(|| AppError::NotFound(id.to_string()))
}

fn authorize(
    state: &AppState,
    auth_context: &AuthContext,
    lease: &Lease,
    op: Operation,
) -> Result<(), AppError> {
    if lease.owner().eq_ignore_ascii_case(auth_context.email()) {
        return Ok(());
    }
    state.permission_service.require(auth_context, op, LEASE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_request_body() {
        let req: LeaseRequest = serde_json::from_value(serde_json::json!({
            "email": "u@x",
            "duration": "1h",
            "request": [{"type": "compute.server", "group": "sj14", "name": "req", "count": 1}]
        }))
        .unwrap();
        assert_eq!(req.duration, Duration::from_secs(3600));
        assert_eq!(req.request[0].kind, "compute.server");
        assert_eq!(req.email.as_deref(), Some("u@x"));
    }

    #[test]
    fn test_bad_duration_rejected() {
        let result: Result<LeaseRequest, _> = serde_json::from_value(serde_json::json!({
            "duration": "soon",
            "request": []
        }));
        assert!(result.is_err());
    }
}
