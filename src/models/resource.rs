//! Resource variants
//!
//! Every variant shares the [`Meta`]/[`Status`] header (flattened at the top
//! level of its JSON form) plus type-specific fields. Decoding always goes
//! through the factory so that `type.name` selects the variant.

use super::{
    factory, lease::Lease, meta::Meta, meta::Status, user::User, Credentials, ModelError,
    ValidationContext,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::net::IpAddr;

fn require_ip(field: &str, ip: &IpAddr) -> Result<(), ModelError> {
    if ip.is_unspecified() {
        return Err(ModelError::validation(format!("{} must not be zero", field)));
    }
    Ok(())
}

fn require_text(field: &str, value: &str) -> Result<(), ModelError> {
    if value.trim().is_empty() {
        return Err(ModelError::validation(format!("{} must not be empty", field)));
    }
    Ok(())
}

/// Bare-metal server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Server {
    #[serde(flatten)]
    pub meta: Meta,
    #[serde(default)]
    pub status: Status,
    pub serial: String,
    #[serde(rename = "boardIP")]
    pub board_ip: IpAddr,
    #[serde(default)]
    pub model: String,
    pub credentials: Credentials,
}

impl Server {
    fn validate_fields(&self) -> Result<(), ModelError> {
        require_text("serial", &self.serial)?;
        require_ip("boardIP", &self.board_ip)?;
        self.credentials.validate()
    }
}

/// Hypervisor host running on a server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Esx {
    #[serde(flatten)]
    pub meta: Meta,
    #[serde(default)]
    pub status: Status,
    #[serde(rename = "serverID")]
    pub server_id: String,
    #[serde(rename = "IP")]
    pub ip: IpAddr,
    pub credentials: Credentials,
}

impl Esx {
    fn validate_fields(&self) -> Result<(), ModelError> {
        require_text("serverID", &self.server_id)?;
        require_ip("IP", &self.ip)?;
        self.credentials.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VCenter {
    #[serde(flatten)]
    pub meta: Meta,
    #[serde(default)]
    pub status: Status,
    #[serde(rename = "IP")]
    pub ip: IpAddr,
    pub credentials: Credentials,
}

impl VCenter {
    fn validate_fields(&self) -> Result<(), ModelError> {
        require_ip("IP", &self.ip)?;
        self.credentials.validate()
    }
}

/// Virtual machine placed on an ESX host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vm {
    #[serde(flatten)]
    pub meta: Meta,
    #[serde(default)]
    pub status: Status,
    #[serde(rename = "esxID")]
    pub esx_id: String,
    #[serde(rename = "managementIP")]
    pub management_ip: IpAddr,
    pub credentials: Credentials,
}

impl Vm {
    fn validate_fields(&self) -> Result<(), ModelError> {
        require_text("esxID", &self.esx_id)?;
        require_ip("managementIP", &self.management_ip)?;
        self.credentials.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Switch {
    #[serde(flatten)]
    pub meta: Meta,
    #[serde(default)]
    pub status: Status,
    #[serde(rename = "managementIP")]
    pub management_ip: IpAddr,
    pub serial: String,
    #[serde(default)]
    pub model: String,
    pub num_ports: u32,
    pub credentials: Credentials,
}

impl Switch {
    fn validate_fields(&self) -> Result<(), ModelError> {
        require_ip("managementIP", &self.management_ip)?;
        require_text("serial", &self.serial)?;
        if self.num_ports == 0 {
            return Err(ModelError::validation("numPorts must be positive"));
        }
        self.credentials.validate()
    }
}

/// Pool of subnets in CIDR notation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpAddressPool {
    #[serde(flatten)]
    pub meta: Meta,
    #[serde(default)]
    pub status: Status,
    pub subnets: Vec<String>,
}

impl IpAddressPool {
    fn validate_fields(&self) -> Result<(), ModelError> {
        if self.subnets.is_empty() {
            return Err(ModelError::validation("an address pool needs at least one subnet"));
        }
        for subnet in &self.subnets {
            validate_cidr(subnet)?;
        }
        Ok(())
    }
}

fn validate_cidr(subnet: &str) -> Result<(), ModelError> {
    let invalid = || ModelError::validation(format!("invalid subnet: {}", subnet));

    let (addr, prefix) = subnet.split_once('/').ok_or_else(invalid)?;
    let addr: IpAddr = addr.parse().map_err(|_| invalid())?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
    let max = if addr.is_ipv4() { 32 } else { 128 };
    if prefix > max || addr.is_unspecified() {
        return Err(invalid());
    }
    Ok(())
}

const MAX_VLAN_ID: u16 = 4094;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VlanPool {
    #[serde(flatten)]
    pub meta: Meta,
    #[serde(default)]
    pub status: Status,
    pub range_start: u16,
    pub range_end: u16,
}

impl VlanPool {
    fn validate_fields(&self) -> Result<(), ModelError> {
        if self.range_start > self.range_end {
            return Err(ModelError::validation(format!(
                "vlan range {}..{} is not ascending",
                self.range_start, self.range_end
            )));
        }
        if self.range_end > MAX_VLAN_ID {
            return Err(ModelError::validation(format!(
                "vlan id {} exceeds {}",
                self.range_end, MAX_VLAN_ID
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Datacenter {
    #[serde(flatten)]
    pub meta: Meta,
    #[serde(default)]
    pub status: Status,
    pub address: String,
}

impl Datacenter {
    fn validate_fields(&self) -> Result<(), ModelError> {
        require_text("address", &self.address)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lab {
    #[serde(flatten)]
    pub meta: Meta,
    #[serde(default)]
    pub status: Status,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rack {
    #[serde(flatten)]
    pub meta: Meta,
    #[serde(default)]
    pub status: Status,
    pub row: u32,
}

/// A stored resource of any registered type.
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    Server(Server),
    Esx(Esx),
    VCenter(VCenter),
    Vm(Vm),
    Switch(Switch),
    IpAddressPool(IpAddressPool),
    VlanPool(VlanPool),
    Datacenter(Datacenter),
    Lab(Lab),
    Rack(Rack),
    User(User),
    Lease(Lease),
}

/// Expand `$body` once per variant with `$inner` bound to the variant payload.
macro_rules! dispatch {
    ($value:expr, $inner:ident => $body:expr) => {
        match $value {
            Resource::Server($inner) => $body,
            Resource::Esx($inner) => $body,
            Resource::VCenter($inner) => $body,
            Resource::Vm($inner) => $body,
            Resource::Switch($inner) => $body,
            Resource::IpAddressPool($inner) => $body,
            Resource::VlanPool($inner) => $body,
            Resource::Datacenter($inner) => $body,
            Resource::Lab($inner) => $body,
            Resource::Rack($inner) => $body,
            Resource::User($inner) => $body,
            Resource::Lease($inner) => $body,
        }
    };
}

impl Resource {
    pub fn meta(&self) -> &Meta {
        dispatch!(self, r => &r.meta)
    }

    pub fn meta_mut(&mut self) -> &mut Meta {
        dispatch!(self, r => &mut r.meta)
    }

    pub fn status(&self) -> &Status {
        dispatch!(self, r => &r.status)
    }

    /// Mutable status; only the store and the scheduler should call this.
    pub fn update_status(&mut self) -> &mut Status {
        dispatch!(self, r => &mut r.status)
    }

    pub fn id(&self) -> &str {
        &self.meta().id
    }

    pub fn type_name(&self) -> &str {
        &self.meta().kind.name
    }

    pub fn group(&self) -> Option<&str> {
        self.meta().group()
    }

    pub fn normalize(&mut self) {
        self.meta_mut().normalize();
    }

    /// Meta first, then status, then the type-specific fields.
    pub fn validate(&self, ctx: &ValidationContext) -> Result<(), ModelError> {
        self.meta().validate()?;
        self.status().validate()?;

        match self {
            Resource::Server(r) => r.validate_fields(),
            Resource::Esx(r) => r.validate_fields(),
            Resource::VCenter(r) => r.validate_fields(),
            Resource::Vm(r) => r.validate_fields(),
            Resource::Switch(r) => r.validate_fields(),
            Resource::IpAddressPool(r) => r.validate_fields(),
            Resource::VlanPool(r) => r.validate_fields(),
            Resource::Datacenter(r) => r.validate_fields(),
            Resource::Lab(_) | Resource::Rack(_) => Ok(()),
            Resource::User(r) => r.validate_fields(),
            Resource::Lease(r) => r.validate_fields(ctx),
        }
    }

    /// Copy safe to hand out over the API (no password digests).
    pub fn redacted(&self) -> Resource {
        match self {
            Resource::User(user) => Resource::User(user.redacted()),
            other => other.clone(),
        }
    }

    pub fn as_lease(&self) -> Option<&Lease> {
        match self {
            Resource::Lease(lease) => Some(lease),
            _ => None,
        }
    }

    pub fn as_user(&self) -> Option<&User> {
        match self {
            Resource::User(user) => Some(user),
            _ => None,
        }
    }
}

impl Serialize for Resource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        dispatch!(self, r => r.serialize(serializer))
    }
}

impl<'de> Deserialize<'de> for Resource {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        factory()
            .decode(value)
            .map_err(serde::de::Error::custom)
    }
}
