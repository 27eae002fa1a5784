//! 权限检查服务
//! 角色的每条权限以正则匹配资源类型名；任意一条允许即允许

use crate::{
    auth::AuthContext,
    error::AppError,
    models::{Operation, ResourceMap, Role},
};
use dashmap::DashMap;
use regex::Regex;

#[derive(Default)]
pub struct PermissionService {
    /// privilege key -> 编译后的整串匹配正则；None 表示 key 非法
    patterns: DashMap<String, Option<Regex>>,
}

impl PermissionService {
    pub fn new() -> Self {
        Self::default()
    }

    /// 检查角色是否允许对某类型执行操作
    pub fn allows(&self, role: &Role, op: Operation, type_name: &str) -> bool {
        role.privileges
            .iter()
            .filter(|p| p.allows(op))
            .any(|p| self.key_matches(&p.key, type_name))
    }

    /// 检查权限，如果无权限则返回错误
    pub fn require(&self, ctx: &AuthContext, op: Operation, type_name: &str) -> Result<(), AppError> {
        if self.allows(&ctx.role, op, type_name) {
            return Ok(());
        }

        tracing::warn!(
            email = %ctx.email(),
            role = %ctx.role.name,
            operation = ?op,
            type_name = %type_name,
            "operation denied"
        );
        Err(AppError::forbidden(format!(
            "role {} may not {:?} {}",
            ctx.role.name, op, type_name
        )))
    }

    /// Drops every type the role cannot read.
    pub fn readable(&self, role: &Role, mut resources: ResourceMap) -> ResourceMap {
        resources.retain(|r| self.allows(role, Operation::Read, r.type_name()));
        resources
    }

    fn key_matches(&self, key: &str, type_name: &str) -> bool {
        if let Some(pattern) = self.patterns.get(key) {
            return pattern.as_ref().is_some_and(|re| re.is_match(type_name));
        }

        let compiled = match Regex::new(&format!("^(?:{})$", key)) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "privilege key is not a valid regex");
                None
            }
        };
        let matched = compiled.as_ref().is_some_and(|re| re.is_match(type_name));
        self.patterns.insert(key.to_string(), compiled);
        matched
    }
}
