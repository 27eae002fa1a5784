//! 用户资源与角色权限模型

use super::{meta::Meta, meta::Status, ModelError};
use serde::{Deserialize, Serialize};

/// Resource operation checked against a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
}

/// CRUD flags over every resource type whose name matches `key` (a regex).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Privilege {
    pub key: String,
    #[serde(default)]
    pub create: bool,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub update: bool,
    #[serde(default)]
    pub delete: bool,
}

impl Privilege {
    pub fn allows(&self, op: Operation) -> bool {
        match op {
            Operation::Create => self.create,
            Operation::Read => self.read,
            Operation::Update => self.update,
            Operation::Delete => self.delete,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    #[serde(default)]
    pub privileges: Vec<Privilege>,
}

pub const ADMIN_ROLE: &str = "admin";
pub const READ_ONLY_ROLE: &str = "read-only";

impl Role {
    /// 全部类型的完整 CRUD 权限
    pub fn admin() -> Self {
        Self {
            name: ADMIN_ROLE.to_string(),
            privileges: vec![Privilege {
                key: ".*".to_string(),
                create: true,
                read: true,
                update: true,
                delete: true,
            }],
        }
    }

    /// 注册用户的默认角色：全部类型只读
    pub fn read_only() -> Self {
        Self {
            name: READ_ONLY_ROLE.to_string(),
            privileges: vec![Privilege {
                key: ".*".to_string(),
                create: false,
                read: true,
                update: false,
                delete: false,
            }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(flatten)]
    pub meta: Meta,
    #[serde(default)]
    pub status: Status,
    /// PEM-encoded RSA public key
    #[serde(default)]
    pub public_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password_hash: String,
    pub role: Role,
    pub email: String,
}

impl User {
    pub(crate) fn validate_fields(&self) -> Result<(), ModelError> {
        let well_formed = self
            .email
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && !domain.is_empty());
        if !well_formed {
            return Err(ModelError::validation(format!(
                "invalid user email: {:?}",
                self.email
            )));
        }
        if self.role.name.trim().is_empty() {
            return Err(ModelError::validation("user role needs a name"));
        }
        if self.role.privileges.iter().any(|p| p.key.is_empty()) {
            return Err(ModelError::validation("privilege key must not be empty"));
        }
        Ok(())
    }

    /// Same record without the password digest.
    pub fn redacted(&self) -> Self {
        Self {
            password_hash: String::new(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{factory::USER, Resource, ValidationContext};
    use serde_json::json;

    fn user_json() -> serde_json::Value {
        json!({
            "name": "alice",
            "type": {"name": USER, "description": "system user"},
            "labels": {"system.group": "system"},
            "passwordHash": "$argon2id$v=19$m=8,t=1,p=1$c2FsdA$aGFzaA",
            "role": {"name": "read-only", "privileges": [{"key": ".*", "read": true}]},
            "email": "alice@example.com"
        })
    }

    #[test]
    fn test_user_decodes_and_validates() {
        let resource: Resource = serde_json::from_value(user_json()).unwrap();
        let user = resource.as_user().unwrap();
        assert_eq!(user.email, "alice@example.com");
        assert!(user.role.privileges[0].allows(Operation::Read));
        assert!(!user.role.privileges[0].allows(Operation::Delete));
        resource.validate(&ValidationContext::default()).unwrap();
    }

    #[test]
    fn test_bad_email_rejected() {
        let mut value = user_json();
        value["email"] = json!("alice");
        let resource: Resource = serde_json::from_value(value).unwrap();
        assert!(resource.validate(&ValidationContext::default()).is_err());
    }

    #[test]
    fn test_redaction_drops_hash_from_wire() {
        let resource: Resource = serde_json::from_value(user_json()).unwrap();
        let json = serde_json::to_value(resource.redacted()).unwrap();
        assert!(json.get("passwordHash").is_none());
        assert_eq!(json["email"], "alice@example.com");
    }

    #[test]
    fn test_builtin_roles() {
        assert!(Role::admin().privileges.iter().all(|p| p.allows(Operation::Delete)));
        assert!(!Role::read_only().privileges.iter().any(|p| p.allows(Operation::Create)));
    }
}
