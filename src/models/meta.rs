//! Resource header: type descriptor, meta and status

use super::ModelError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Mandatory label carrying the scheduling group of a resource.
pub const GROUP_LABEL: &str = "system.group";

const MIN_ID_LEN: usize = 7;

/// Type descriptor, e.g. `compute.server`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeDescriptor {
    pub name: String,
    pub description: String,
}

impl TypeDescriptor {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.name.trim().is_empty() {
            return Err(ModelError::validation("type name must not be empty"));
        }
        if self.description.trim().is_empty() {
            return Err(ModelError::validation(format!(
                "type {} has an empty description",
                self.name
            )));
        }
        Ok(())
    }
}

/// Common metadata carried by every resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    #[serde(default = "new_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: TypeDescriptor,
    #[serde(default)]
    pub owner: String,
    #[serde(default = "Utc::now")]
    pub created: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub modified: DateTime<Utc>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

impl Meta {
    /// Fresh meta with a random id and the group label set.
    pub fn new(kind: TypeDescriptor, name: &str, group: &str) -> Self {
        let now = Utc::now();
        let mut labels = BTreeMap::new();
        labels.insert(GROUP_LABEL.to_string(), group.to_string());

        let mut meta = Self {
            id: new_id(),
            name: name.to_string(),
            kind,
            owner: String::new(),
            created: now,
            modified: now,
            labels,
        };
        meta.normalize();
        meta
    }

    /// Blank names default to the id prefix.
    pub fn normalize(&mut self) {
        if self.name.trim().is_empty() {
            self.name = self.id.chars().take(MIN_ID_LEN).collect();
        }
    }

    pub fn group(&self) -> Option<&str> {
        self.labels.get(GROUP_LABEL).map(String::as_str)
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        validate_id(&self.id)?;
        self.kind.validate()?;

        match self.group() {
            Some(group) if !group.trim().is_empty() => {}
            _ => {
                return Err(ModelError::validation(format!(
                    "resource {} is missing the {} label",
                    self.id, GROUP_LABEL
                )))
            }
        }

        if self.labels.keys().any(|k| k.trim().is_empty()) {
            return Err(ModelError::validation("label keys must not be empty"));
        }

        Ok(())
    }
}

/// Ids are UUID-like: at least seven characters of hex digits and dashes.
/// The first two characters pick the on-disk shard.
pub fn validate_id(id: &str) -> Result<(), ModelError> {
    if id.len() < MIN_ID_LEN {
        return Err(ModelError::validation(format!(
            "id {:?} is shorter than {} characters",
            id, MIN_ID_LEN
        )));
    }
    if !id.chars().all(|c| c.is_ascii_hexdigit() || c == '-') {
        return Err(ModelError::validation(format!("id {:?} is not a uuid", id)));
    }
    if !id.chars().take(2).all(|c| c.is_ascii_hexdigit()) {
        return Err(ModelError::validation(format!(
            "id {:?} must start with two hex digits",
            id
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fault {
    #[default]
    None,
    Minor,
    Major,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaseState {
    #[default]
    Free,
    Leased,
    /// Reserved for staging; the scheduler never moves resources into it.
    Setup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityState {
    #[default]
    Active,
    Inactive,
}

/// Runtime status of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    #[serde(default)]
    pub fault: Fault,
    #[serde(default)]
    pub lease: LeaseState,
    #[serde(default)]
    pub state: ActivityState,
    #[serde(default)]
    pub used_by: String,
}

impl Status {
    pub fn is_free(&self) -> bool {
        self.lease == LeaseState::Free
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.lease == LeaseState::Leased && self.used_by.is_empty() {
            return Err(ModelError::validation(
                "a leased resource must name its user in usedBy",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_type() -> TypeDescriptor {
        TypeDescriptor::new("compute.server", "physical server")
    }

    #[test]
    fn test_new_meta_defaults_name_to_id_prefix() {
        let meta = Meta::new(server_type(), "", "sj14");
        assert_eq!(meta.name.len(), 7);
        assert!(meta.id.starts_with(&meta.name));
        assert_eq!(meta.group(), Some("sj14"));
        meta.validate().unwrap();
    }

    #[test]
    fn test_missing_group_label_is_invalid() {
        let mut meta = Meta::new(server_type(), "srv", "sj14");
        meta.labels.remove(GROUP_LABEL);
        assert!(meta.validate().is_err());

        meta.labels.insert(GROUP_LABEL.to_string(), "  ".to_string());
        assert!(meta.validate().is_err());
    }

    #[test]
    fn test_type_descriptor_requires_name_and_description() {
        assert!(TypeDescriptor::new("", "x").validate().is_err());
        assert!(TypeDescriptor::new("dc.rack", "").validate().is_err());
        assert!(TypeDescriptor::new("dc.rack", "rack").validate().is_ok());
    }

    #[test]
    fn test_id_validation() {
        assert!(validate_id("abc").is_err());
        assert!(validate_id("zz00000").is_err());
        assert!(validate_id("../../etc").is_err());
        assert!(validate_id("ab12cd3").is_ok());
        assert!(validate_id(&Uuid::new_v4().to_string()).is_ok());
    }

    #[test]
    fn test_status_defaults_and_wire_format() {
        let status = Status::default();
        assert_eq!(status.fault, Fault::None);
        assert_eq!(status.lease, LeaseState::Free);
        assert_eq!(status.state, ActivityState::Active);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["fault"], "none");
        assert_eq!(json["lease"], "free");
        assert_eq!(json["state"], "active");
        assert_eq!(json["usedBy"], "");
    }

    #[test]
    fn test_status_rejects_unknown_enum_value() {
        let result: Result<Status, _> =
            serde_json::from_str(r#"{"fault":"catastrophic","lease":"free"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_leased_status_requires_user() {
        let status = Status {
            lease: LeaseState::Leased,
            ..Status::default()
        };
        assert!(status.validate().is_err());
    }
}
