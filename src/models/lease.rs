//! Lease record and its state machine
//!
//! A lease starts *pending* (inactive, never activated), becomes active once
//! every requirement has its full count assigned, and ends when it is
//! deactivated, either by its expiry watcher or by an explicit cancel.
//!
//! ```text
//! pending ──activate──▶ active ──deactivate──▶ released
//!    └──────────────── cancel ─────────────────────┘
//! ```

use super::{
    factory::{self, LEASE},
    meta::{ActivityState, Meta, Status, TypeDescriptor},
    ModelError, Query, Resource, ValidationContext,
};
use crate::repository::{Store, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Group label carried by leases and users.
pub const SYSTEM_GROUP: &str = "system";

/// One line of a lease request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceReq {
    #[serde(rename = "type")]
    pub kind: String,
    pub group: String,
    #[serde(default)]
    pub name: String,
    pub count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<Vec<Query>>,
    /// Resources assigned so far.
    #[serde(default)]
    pub resources: Vec<Resource>,
}

impl ResourceReq {
    pub fn new(kind: &str, group: &str, count: u32) -> Self {
        Self {
            kind: kind.to_string(),
            group: group.to_string(),
            name: String::new(),
            count,
            filters: None,
            resources: Vec::new(),
        }
    }

    pub fn is_satisfied(&self) -> bool {
        self.resources.len() == self.count as usize
    }

    pub fn remaining(&self) -> usize {
        (self.count as usize).saturating_sub(self.resources.len())
    }

    /// Records `resource` as assigned; false if full or already present.
    pub fn assign(&mut self, resource: Resource) -> bool {
        if self.is_satisfied() || self.resources.iter().any(|r| r.id() == resource.id()) {
            return false;
        }
        self.resources.push(resource);
        true
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.kind.trim().is_empty() {
            return Err(ModelError::LeaseInvalid("requirement needs a type".into()));
        }
        if self.kind.starts_with("system.") || !factory::factory().contains(&self.kind) {
            return Err(ModelError::LeaseInvalid(format!(
                "type {} cannot be leased",
                self.kind
            )));
        }
        if self.group.trim().is_empty() {
            return Err(ModelError::LeaseInvalid(format!(
                "requirement for {} needs a group",
                self.kind
            )));
        }
        if self.count == 0 {
            return Err(ModelError::LeaseInvalid(format!(
                "requirement for {} must ask for at least one resource",
                self.kind
            )));
        }
        if self.resources.len() > self.count as usize {
            return Err(ModelError::LeaseInvalid(format!(
                "requirement for {} holds more resources than requested",
                self.kind
            )));
        }
        for query in self.filters.iter().flatten() {
            query.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    #[serde(flatten)]
    pub meta: Meta,
    #[serde(default)]
    pub status: Status,
    #[serde(with = "duration_str")]
    pub duration: Duration,
    pub request: Vec<ResourceReq>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activation_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released_at: Option<DateTime<Utc>>,
}

impl Lease {
    /// New pending lease owned by `owner` (an email).
    pub fn new(owner: &str, duration: Duration, request: Vec<ResourceReq>) -> Self {
        let mut meta = Meta::new(TypeDescriptor::new(LEASE, "resource lease"), "", SYSTEM_GROUP);
        meta.owner = owner.to_string();
        let status = Status {
            state: ActivityState::Inactive,
            used_by: owner.to_string(),
            ..Status::default()
        };
        Self {
            meta,
            status,
            duration,
            request,
            activation_time: None,
            released_at: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.meta.id
    }

    pub fn owner(&self) -> &str {
        &self.status.used_by
    }

    /// Never activated and not released.
    pub fn is_pending(&self) -> bool {
        self.activation_time.is_none() && self.released_at.is_none()
    }

    pub fn is_satisfied(&self) -> bool {
        self.request.iter().all(ResourceReq::is_satisfied)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let window = chrono::Duration::from_std(self.duration).ok()?;
        self.activation_time?.checked_add_signed(window)
    }

    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.status.state == ActivityState::Active
            && self.released_at.is_none()
            && self.expires_at().is_some_and(|end| now < end)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        if self.released_at.is_some() {
            return true;
        }
        match self.activation_time {
            Some(_) => {
                self.status.state == ActivityState::Inactive
                    || self.expires_at().map_or(true, |end| now >= end)
            }
            None => false,
        }
    }

    /// Pending or inside its window: still entitled to its resources.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() || self.is_valid(now)
    }

    pub fn assigned_ids(&self) -> Vec<String> {
        self.request
            .iter()
            .flat_map(|req| req.resources.iter().map(|r| r.id().to_string()))
            .collect()
    }

    pub fn activate(&mut self, now: DateTime<Utc>) -> Result<(), ModelError> {
        if !self.is_pending() {
            return Err(ModelError::LeaseInvalid(format!(
                "lease {} was already activated or released",
                self.meta.id
            )));
        }
        if !self.is_satisfied() {
            return Err(ModelError::LeaseInvalid(format!(
                "lease {} is not satisfied",
                self.meta.id
            )));
        }
        self.activation_time = Some(now);
        self.status.state = ActivityState::Active;
        self.meta.modified = now;
        Ok(())
    }

    /// Marks the lease released and hands every assigned id back to the
    /// store's free pool. Returns the ids that were freed.
    pub fn deactivate(
        &mut self,
        store: &dyn Store,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, StoreError> {
        self.status.state = ActivityState::Inactive;
        if self.released_at.is_none() {
            self.released_at = Some(now);
        }
        self.meta.modified = now;

        let ids = self.assigned_ids();
        store.free_resources(&ids)?;
        Ok(ids)
    }

    pub(crate) fn validate_fields(&self, ctx: &ValidationContext) -> Result<(), ModelError> {
        if self.duration.is_zero() {
            return Err(ModelError::LeaseInvalid("duration must be positive".into()));
        }
        if self.duration > ctx.max_lease_duration {
            return Err(ModelError::LeaseInvalid(format!(
                "duration {} exceeds the maximum of {}",
                duration_str::format(self.duration),
                duration_str::format(ctx.max_lease_duration)
            )));
        }
        if let Some(at) = self.activation_time {
            if at > Utc::now() {
                return Err(ModelError::LeaseInvalid(
                    "activation time is in the future".into(),
                ));
            }
        }
        if self.request.is_empty() {
            return Err(ModelError::LeaseInvalid("request must not be empty".into()));
        }
        if self.owner().trim().is_empty() {
            return Err(ModelError::LeaseInvalid("lease has no owner".into()));
        }
        for req in &self.request {
            req.validate()?;
        }
        Ok(())
    }
}

/// Durations on the wire are strings such as `"1h"`, `"90s"` or `"1h30m"`.
pub(crate) mod duration_str {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    const UNITS: [(&str, u64); 4] = [("h", 3_600_000), ("m", 60_000), ("s", 1_000), ("ms", 1)];

    /// Sequence of `<integer><unit>` pairs, units `h`, `m`, `s`, `ms`.
    pub fn parse(raw: &str) -> Option<Duration> {
        let mut rest = raw.trim();
        if rest.is_empty() {
            return None;
        }

        let mut total_ms: u64 = 0;
        while !rest.is_empty() {
            let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
            if digits == 0 {
                return None;
            }
            let value: u64 = rest[..digits].parse().ok()?;
            rest = &rest[digits..];

            let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
            let unit = &rest[..unit_len];
            rest = &rest[unit_len..];

            let (_, scale) = UNITS.iter().find(|(name, _)| *name == unit)?;
            total_ms = total_ms.checked_add(value.checked_mul(*scale)?)?;
        }
        Some(Duration::from_millis(total_ms))
    }

    /// Inverse of [`parse`]; zero formats as `"0s"`.
    pub fn format(value: Duration) -> String {
        let mut ms = value.as_millis() as u64;
        if ms == 0 {
            return "0s".to_string();
        }
        let mut out = String::new();
        for (name, scale) in UNITS {
            if ms >= scale {
                out.push_str(&format!("{}{}", ms / scale, name));
                ms %= scale;
            }
        }
        out
    }

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| de::Error::custom(format!("invalid duration: {:?}", raw)))
    }
}
