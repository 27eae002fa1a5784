//! Two-level container: type name -> resources of that type

use super::Resource;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ResourceMap {
    inner: BTreeMap<String, Vec<Resource>>,
}

impl ResourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `resource`, replacing any entry with the same id.
    pub fn add(&mut self, resource: Resource) {
        let list = self.inner.entry(resource.type_name().to_string()).or_default();
        match list.iter_mut().find(|r| r.id() == resource.id()) {
            Some(existing) => *existing = resource,
            None => list.push(resource),
        }
    }

    /// Removes the resource with `id`, dropping the type entry once empty.
    pub fn delete(&mut self, id: &str) -> Option<Resource> {
        let mut removed = None;
        for list in self.inner.values_mut() {
            if let Some(pos) = list.iter().position(|r| r.id() == id) {
                removed = Some(list.remove(pos));
                break;
            }
        }
        self.inner.retain(|_, list| !list.is_empty());
        removed
    }

    pub fn get(&self, type_name: &str) -> &[Resource] {
        self.inner.get(type_name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn find(&self, id: &str) -> Option<&Resource> {
        self.iter().find(|r| r.id() == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.find(id).is_some()
    }

    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.inner.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.inner.values().flatten()
    }

    pub fn into_resources(self) -> impl Iterator<Item = Resource> {
        self.inner.into_values().flatten()
    }

    /// Number of resources across every type.
    pub fn len(&self) -> usize {
        self.inner.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keeps only resources for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&Resource) -> bool) {
        for list in self.inner.values_mut() {
            list.retain(|r| keep(r));
        }
        self.inner.retain(|_, list| !list.is_empty());
    }

    pub fn map_resources(self, f: impl Fn(Resource) -> Resource) -> Self {
        self.into_resources().map(f).collect()
    }
}

impl FromIterator<Resource> for ResourceMap {
    fn from_iter<I: IntoIterator<Item = Resource>>(iter: I) -> Self {
        let mut map = ResourceMap::new();
        for resource in iter {
            map.add(resource);
        }
        map
    }
}

impl<'de> Deserialize<'de> for ResourceMap {
    /// Each element decodes through the factory; the outer key is advisory and
    /// elements are re-keyed by their own `type.name`.
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, Vec<Resource>>::deserialize(deserializer)?;
        Ok(raw.into_values().flatten().collect())
    }
}
