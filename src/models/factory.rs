//! Process-wide resource factory
//!
//! Maps a type name to the constructor that decodes a JSON record into the
//! right [`Resource`] variant. Everything that decodes wire or on-disk data
//! goes through [`factory()`], so a type tag always selects the same
//! constructor.

use super::{
    lease::Lease,
    meta::TypeDescriptor,
    resource::{
        Datacenter, Esx, IpAddressPool, Lab, Rack, Resource, Server, Switch, VCenter, VlanPool, Vm,
    },
    user::User,
    ModelError,
};
use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

pub const SERVER: &str = "compute.server";
pub const ESX: &str = "compute.esx";
pub const VCENTER: &str = "compute.vcenter";
pub const VM: &str = "compute.vm";
pub const SWITCH: &str = "network.switch";
pub const IP_ADDRESS_POOL: &str = "network.ipAddressPool";
pub const VLAN_POOL: &str = "network.vlanPool";
pub const DATACENTER: &str = "dc.datacenter";
pub const LAB: &str = "dc.lab";
pub const RACK: &str = "dc.rack";
pub const USER: &str = "system.user";
pub const LEASE: &str = "system.lease";

/// Decodes a JSON record into a concrete resource.
pub type Constructor = fn(Value) -> Result<Resource, serde_json::Error>;

struct Entry {
    descriptor: TypeDescriptor,
    construct: Constructor,
}

pub struct Factory {
    entries: RwLock<BTreeMap<String, Entry>>,
}

static FACTORY: Lazy<Factory> = Lazy::new(Factory::with_builtins);

/// The shared registry, populated with every built-in type on first use.
pub fn factory() -> &'static Factory {
    &FACTORY
}

impl Factory {
    pub fn empty() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn with_builtins() -> Self {
        let factory = Self::empty();
        factory.register(TypeDescriptor::new(SERVER, "bare-metal server"), |v| {
            serde_json::from_value::<Server>(v).map(Resource::Server)
        });
        factory.register(TypeDescriptor::new(ESX, "ESX hypervisor host"), |v| {
            serde_json::from_value::<Esx>(v).map(Resource::Esx)
        });
        factory.register(TypeDescriptor::new(VCENTER, "vCenter appliance"), |v| {
            serde_json::from_value::<VCenter>(v).map(Resource::VCenter)
        });
        factory.register(TypeDescriptor::new(VM, "virtual machine"), |v| {
            serde_json::from_value::<Vm>(v).map(Resource::Vm)
        });
        factory.register(TypeDescriptor::new(SWITCH, "network switch"), |v| {
            serde_json::from_value::<Switch>(v).map(Resource::Switch)
        });
        factory.register(TypeDescriptor::new(IP_ADDRESS_POOL, "pool of IP subnets"), |v| {
            serde_json::from_value::<IpAddressPool>(v).map(Resource::IpAddressPool)
        });
        factory.register(TypeDescriptor::new(VLAN_POOL, "pool of VLAN ids"), |v| {
            serde_json::from_value::<VlanPool>(v).map(Resource::VlanPool)
        });
        factory.register(TypeDescriptor::new(DATACENTER, "datacenter"), |v| {
            serde_json::from_value::<Datacenter>(v).map(Resource::Datacenter)
        });
        factory.register(TypeDescriptor::new(LAB, "lab"), |v| {
            serde_json::from_value::<Lab>(v).map(Resource::Lab)
        });
        factory.register(TypeDescriptor::new(RACK, "rack"), |v| {
            serde_json::from_value::<Rack>(v).map(Resource::Rack)
        });
        factory.register(TypeDescriptor::new(USER, "system user"), |v| {
            serde_json::from_value::<User>(v).map(Resource::User)
        });
        factory.register(TypeDescriptor::new(LEASE, "resource lease"), |v| {
            serde_json::from_value::<Lease>(v).map(Resource::Lease)
        });
        factory
    }

    /// Registers (or replaces) the constructor for a type name.
    pub fn register(&self, descriptor: TypeDescriptor, construct: Constructor) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(descriptor.name.clone(), Entry { descriptor, construct });
    }

    pub fn contains(&self, type_name: &str) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.contains_key(type_name)
    }

    pub fn descriptor(&self, type_name: &str) -> Option<TypeDescriptor> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(type_name).map(|e| e.descriptor.clone())
    }

    /// All registered descriptors, ordered by name.
    pub fn descriptors(&self) -> Vec<TypeDescriptor> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.values().map(|e| e.descriptor.clone()).collect()
    }

    /// Builds the resource of type `type_name` from `value`.
    pub fn construct(&self, type_name: &str, value: Value) -> Result<Resource, ModelError> {
        let construct = {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            entries
                .get(type_name)
                .map(|e| e.construct)
                .ok_or_else(|| ModelError::UnknownType(type_name.to_string()))?
        };

        let mut resource = construct(value)?;
        resource.normalize();
        Ok(resource)
    }

    /// Reads `type.name` from the record and dispatches to its constructor.
    pub fn decode(&self, value: Value) -> Result<Resource, ModelError> {
        let type_name = type_name_of(&value)
            .ok_or_else(|| ModelError::validation("resource record has no type name"))?
            .to_string();
        self.construct(&type_name, value)
    }
}

/// `type.name` of a raw JSON record, if present.
pub fn type_name_of(value: &Value) -> Option<&str> {
    value
        .get("type")
        .and_then(|t| t.get("name"))
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtins_are_registered() {
        let names: Vec<String> = factory().descriptors().into_iter().map(|d| d.name).collect();
        for name in [
            SERVER,
            ESX,
            VCENTER,
            VM,
            SWITCH,
            IP_ADDRESS_POOL,
            VLAN_POOL,
            DATACENTER,
            LAB,
            RACK,
            USER,
            LEASE,
        ] {
            assert!(names.iter().any(|n| n == name), "missing {}", name);
        }
    }

    #[test]
    fn test_decode_requires_type() {
        let err = factory().decode(json!({"name": "x"})).unwrap_err();
        assert!(matches!(err, ModelError::Validation(_)));
    }

    #[test]
    fn test_decode_unknown_type() {
        let err = factory()
            .decode(json!({"type": {"name": "not.a.type", "description": "?"}}))
            .unwrap_err();
        assert!(matches!(err, ModelError::UnknownType(ref name) if name == "not.a.type"));
    }

    #[test]
    fn test_register_extends_registry() {
        let local = Factory::empty();
        assert!(!local.contains("dc.cage"));
        local.register(TypeDescriptor::new("dc.cage", "cage reusing the lab shape"), |v| {
            serde_json::from_value::<Lab>(v).map(Resource::Lab)
        });
        let resource = local
            .decode(json!({
                "type": {"name": "dc.cage", "description": "cage"},
                "labels": {"system.group": "g1"}
            }))
            .unwrap();
        assert_eq!(resource.type_name(), "dc.cage");
        assert_eq!(resource.meta().name.len(), 7);
    }
}
