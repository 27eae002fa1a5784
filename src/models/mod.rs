//! 数据模型模块
//! 资源记录（元数据、状态、类型专属字段）、资源映射、查询、租约与用户

pub mod auth;
pub mod credentials;
pub mod factory;
pub mod lease;
pub mod meta;
pub mod query;
pub mod resource;
pub mod resource_map;
pub mod user;

pub use auth::{LoginRequest, RegisterRequest, TokenResponse};
pub use credentials::{validate_password, Credentials};
pub use factory::{factory, Factory};
pub use lease::{Lease, ResourceReq};
pub use meta::{ActivityState, Fault, LeaseState, Meta, Status, TypeDescriptor, GROUP_LABEL};
pub use query::{Op, Query};
pub use resource::Resource;
pub use resource_map::ResourceMap;
pub use user::{Operation, Privilege, Role, User, ADMIN_ROLE, READ_ONLY_ROLE};

use std::time::Duration;
use thiserror::Error;

/// 默认最大租约时长（4 小时）
pub const DEFAULT_MAX_LEASE_DURATION: Duration = Duration::from_secs(4 * 60 * 60);

/// Model-level failures. Each variant maps to one error kind at the HTTP edge.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("invalid query: {0}")]
    QueryInvalid(String),

    #[error("invalid lease: {0}")]
    LeaseInvalid(String),

    #[error("unknown resource type: {0}")]
    UnknownType(String),

    #[error("decode error: {0}")]
    Decode(String),
}

impl ModelError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ModelError::Validation(msg.into())
    }
}

impl From<serde_json::Error> for ModelError {
    fn from(e: serde_json::Error) -> Self {
        ModelError::Decode(e.to_string())
    }
}

/// 验证上下文：携带服务端配置中影响校验结果的参数
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext {
    pub max_lease_duration: Duration,
}

impl Default for ValidationContext {
    fn default() -> Self {
        Self {
            max_lease_duration: DEFAULT_MAX_LEASE_DURATION,
        }
    }
}
