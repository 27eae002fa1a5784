//! 资源管理 HTTP 处理器
//! 类型描述、标签取值，以及资源的查询、创建/更新与删除

use crate::{
    auth::AuthContext,
    error::AppError,
    handlers::{blocking, parse_body, parse_body_or_default},
    middleware::AppState,
    models::{
        factory::{factory, LEASE},
        LeaseState, Operation, Query, Resource, ResourceMap, TypeDescriptor,
    },
    repository::{filter, Axis},
};
use axum::{body::Bytes, extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
pub struct TypesRequest {
    #[serde(default)]
    pub types: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LabelsRequest {
    #[serde(default)]
    pub labels: Vec<String>,
}

/// Body of `GET /resources`. At most one of `ids`, `types`, `properties`
/// may be set; `labels` narrows any of them.
#[derive(Debug, Default, Deserialize)]
pub struct ResourceQuery {
    #[serde(default)]
    pub ids: Option<Vec<String>>,
    #[serde(default)]
    pub types: Option<Vec<String>>,
    #[serde(default)]
    pub labels: Option<Vec<Query>>,
    #[serde(default)]
    pub properties: Option<Vec<Query>>,
}

impl ResourceQuery {
    pub fn validate(&self) -> Result<(), AppError> {
        let selectors = [
            self.ids.is_some(),
            self.types.is_some(),
            self.properties.is_some(),
        ];
        if selectors.iter().filter(|set| **set).count() > 1 {
            return Err(AppError::QueryInvalid(
                "only one of ids, types and properties may be set".to_string(),
            ));
        }
        for query in self.labels.iter().chain(self.properties.iter()).flatten() {
            query.validate()?;
        }
        Ok(())
    }
}

/// 返回类型描述；空列表表示全部
pub async fn list_types(body: Bytes) -> Result<Json<Vec<TypeDescriptor>>, AppError> {
    let req: TypesRequest = parse_body_or_default(&body)?;

    let descriptors = factory()
        .descriptors()
        .into_iter()
        .filter(|d| req.types.is_empty() || req.types.contains(&d.name))
        .collect();
    Ok(Json(descriptors))
}

/// 返回 {标签键 → 去重取值}；空列表表示全部标签
pub async fn list_labels(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<BTreeMap<String, BTreeSet<String>>>, AppError> {
    let req: LabelsRequest = parse_body_or_default(&body)?;

    let mut values = state.store.label_values();
    if !req.labels.is_empty() {
        values.retain(|key, _| req.labels.contains(key));
    }
    Ok(Json(values))
}

/// 查询资源
pub async fn query_resources(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    body: Bytes,
) -> Result<Json<ResourceMap>, AppError> {
    let req: ResourceQuery = parse_body_or_default(&body)?;
    req.validate()?;

    let store = &state.store;
    let mut result = match (&req.ids, &req.types, &req.properties) {
        (Some(ids), _, _) => store.query_uuid(ids),
        (_, Some(types), _) => store.query_type(types),
        (_, _, Some(properties)) => match properties.split_first() {
            Some((first, rest)) => rest.iter().fold(store.query_property(first)?, |acc, q| {
                filter(Axis::Property, q, &acc)
            }),
            None => store.query(),
        },
        (None, None, None) => store.query(),
    };

    for query in req.labels.iter().flatten() {
        result = filter(Axis::Label, query, &result);
    }

    let result = state
        .permission_service
        .readable(&auth_context.role, result)
        .map_resources(|r| r.redacted());

    tracing::debug!(count = result.len(), "resources queried");
    Ok(Json(result))
}

/// 创建或更新资源
/// 整批先校验再写入；任一校验失败则不写入任何资源
pub async fn upsert_resources(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let incoming: ResourceMap = parse_body(&body)?;
    if incoming.is_empty() {
        return Err(AppError::bad_request("no resources in request"));
    }

    for type_name in incoming.types() {
        if type_name == LEASE {
            return Err(AppError::bad_request(
                "leases are created through /api/v1/lease",
            ));
        }
        state
            .permission_service
            .require(&auth_context, Operation::Create, type_name)?;
    }

    let ctx = state.config.validation_context();
    let mut prepared = Vec::with_capacity(incoming.len());
    for mut resource in incoming.into_resources() {
        resource.normalize();
        if resource.meta().owner.is_empty() {
            resource.meta_mut().owner = auth_context.email().to_string();
        }

        // 租约状态只由调度器修改。这里的快照只用于预校验，
        // 写入时由 Store::upsert 在写锁内重新沿用当前值
        match state.store.get(resource.id()) {
            Some(existing) => {
                if existing.type_name() != resource.type_name() {
                    return Err(AppError::bad_request(format!(
                        "resource {} already exists as {}",
                        resource.id(),
                        existing.type_name()
                    )));
                }
                let current = existing.status().clone();
                let status = resource.update_status();
                status.lease = current.lease;
                status.used_by = current.used_by;

                if let (Resource::User(new), Resource::User(old)) = (&mut resource, &existing) {
                    if new.password_hash.is_empty() {
                        new.password_hash = old.password_hash.clone();
                    }
                }
            }
            None => {
                let status = resource.update_status();
                status.lease = LeaseState::Free;
                status.used_by.clear();
            }
        }

        resource.validate(&ctx)?;
        prepared.push(resource);
    }

    let store = state.store.clone();
    let created = blocking(move || {
        let mut created = ResourceMap::new();
        for resource in prepared {
            created.add(store.upsert(resource)?.redacted());
        }
        Ok(created)
    })
    .await?;

    tracing::info!(
        email = %auth_context.email(),
        count = created.len(),
        "resources created or updated"
    );
    Ok((StatusCode::CREATED, Json(created)))
}

/// 删除资源
/// 已租出的资源和存活的租约不能删除
pub async fn delete_resources(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    body: Bytes,
) -> Result<Json<ResourceMap>, AppError> {
    let listed: ResourceMap = parse_body(&body)?;

    let now = chrono::Utc::now();
    let mut ids = Vec::with_capacity(listed.len());
    for resource in listed.iter() {
        let stored = state
            .store
            .get(resource.id())
            .ok_or_else(|| AppError::NotFound(resource.id().to_string()))?;

        state
            .permission_service
            .require(&auth_context, Operation::Delete, stored.type_name())?;

        if stored.status().lease == LeaseState::Leased {
            return Err(AppError::bad_request(format!(
                "resource {} is leased to {}",
                stored.id(),
                stored.status().used_by
            )));
        }
        if let Some(lease) = stored.as_lease() {
            if lease.is_live(now) {
                return Err(AppError::bad_request(format!(
                    "lease {} is still live; release it first",
                    lease.id()
                )));
            }
        }
        ids.push(stored.id().to_string());
    }

    let store = state.store.clone();
    let deleted = blocking(move || {
        let mut deleted = ResourceMap::new();
        for id in &ids {
            deleted.add(store.delete(id)?.redacted());
        }
        Ok(deleted)
    })
    .await?;

    tracing::info!(
        email = %auth_context.email(),
        count = deleted.len(),
        "resources deleted"
    );
    Ok(Json(deleted))
}
