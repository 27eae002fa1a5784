//! Indexed in-memory store over the file backend
//!
//! Three indices (by id, by type, by label pair) are kept in lockstep under a
//! single reader/writer lock. Every mutation persists to disk before the
//! indices change, so a failed write leaves memory untouched. Queries copy
//! their results out under the read lock.

use super::{filter, Axis, FileStore, StoreError};
use crate::models::{LeaseState, ModelError, Query, Resource, ResourceMap, ValidationContext};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// System-wide access to resource state. The scheduler and the HTTP layer
/// only ever go through this trait.
pub trait Store: Send + Sync {
    /// Insert or replace by id.
    fn create(&self, resource: Resource) -> Result<(), StoreError>;

    /// Insert or replace by id from outside the scheduler. The stored lease
    /// state (`lease`, `usedBy`) survives a replace and a new record starts
    /// free; both are decided under the write lock. Returns what was stored.
    fn upsert(&self, resource: Resource) -> Result<Resource, StoreError>;

    /// Removes the resource; `NotFound` if the id is not indexed.
    fn delete(&self, id: &str) -> Result<Resource, StoreError>;

    fn get(&self, id: &str) -> Option<Resource>;

    /// Every resource, grouped by type.
    fn query(&self) -> ResourceMap;

    /// Unknown ids are skipped.
    fn query_uuid(&self, ids: &[String]) -> ResourceMap;

    fn query_type(&self, types: &[String]) -> ResourceMap;

    fn query_label(&self, query: &Query) -> Result<ResourceMap, StoreError>;

    /// Linear scan over every record.
    fn query_property(&self, query: &Query) -> Result<ResourceMap, StoreError>;

    /// Returns each listed resource to the free pool.
    fn free_resources(&self, ids: &[String]) -> Result<(), StoreError>;

    /// Flips a free resource to leased by `owner`. `None` when the resource
    /// is gone or no longer free.
    fn acquire(&self, id: &str, owner: &str) -> Result<Option<Resource>, StoreError>;

    /// Distinct values per label key.
    fn label_values(&self) -> BTreeMap<String, BTreeSet<String>>;

    /// Whether the backing storage accepts writes.
    fn is_writable(&self) -> bool;
}

#[derive(Default)]
struct Indices {
    by_id: HashMap<String, Resource>,
    by_type: HashMap<String, Vec<String>>,
    by_label: HashMap<String, HashMap<String, Vec<String>>>,
}

impl Indices {
    fn insert(&mut self, resource: Resource) {
        let id = resource.id().to_string();
        if self.by_id.contains_key(&id) {
            self.remove(&id);
        }

        self.by_type
            .entry(resource.type_name().to_string())
            .or_default()
            .push(id.clone());
        for (key, value) in &resource.meta().labels {
            self.by_label
                .entry(key.clone())
                .or_default()
                .entry(value.clone())
                .or_default()
                .push(id.clone());
        }
        self.by_id.insert(id, resource);
    }

    fn remove(&mut self, id: &str) -> Option<Resource> {
        let resource = self.by_id.remove(id)?;

        if let Some(ids) = self.by_type.get_mut(resource.type_name()) {
            swap_remove_id(ids, id);
            if ids.is_empty() {
                self.by_type.remove(resource.type_name());
            }
        }
        for (key, value) in &resource.meta().labels {
            if let Some(values) = self.by_label.get_mut(key) {
                if let Some(ids) = values.get_mut(value) {
                    swap_remove_id(ids, id);
                    if ids.is_empty() {
                        values.remove(value);
                    }
                }
                if values.is_empty() {
                    self.by_label.remove(key);
                }
            }
        }
        Some(resource)
    }

    fn collect<'a>(&self, ids: impl IntoIterator<Item = &'a String>) -> ResourceMap {
        ids.into_iter()
            .filter_map(|id| self.by_id.get(id))
            .cloned()
            .collect()
    }

    fn all_ids(&self) -> impl Iterator<Item = &String> {
        self.by_type.values().flatten()
    }
}

fn swap_remove_id(ids: &mut Vec<String>, id: &str) {
    if let Some(pos) = ids.iter().position(|x| x == id) {
        ids.swap_remove(pos);
    }
}

pub struct IndexedStore {
    files: FileStore,
    ctx: ValidationContext,
    indices: RwLock<Indices>,
}

impl IndexedStore {
    /// Prepares the root, loads every record and builds the indices. A
    /// partial load is not fatal: the second element carries the last
    /// per-file failure.
    pub fn open(
        root: impl AsRef<Path>,
        ctx: ValidationContext,
    ) -> Result<(Self, Option<StoreError>), StoreError> {
        let files = FileStore::new(root.as_ref());
        files.init()?;

        let loaded = files.load(&ctx);
        let mut indices = Indices::default();
        for resource in loaded.resources.into_resources() {
            indices.insert(resource);
        }
        info!(
            root = %root.as_ref().display(),
            resources = indices.by_id.len(),
            partial = loaded.last_error.is_some(),
            "resource store opened"
        );

        let store = Self {
            files,
            ctx,
            indices: RwLock::new(indices),
        };
        Ok((store, loaded.last_error))
    }

    pub fn len(&self) -> usize {
        self.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, Indices> {
        self.indices.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Indices> {
        self.indices.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Store for IndexedStore {
    fn create(&self, mut resource: Resource) -> Result<(), StoreError> {
        resource.normalize();
        resource.validate(&self.ctx)?;
        resource.meta_mut().modified = Utc::now();

        let mut indices = self.write();
        self.files.create(&resource)?;
        debug!(id = %resource.id(), kind = %resource.type_name(), "resource stored");
        indices.insert(resource);
        Ok(())
    }

    fn upsert(&self, mut resource: Resource) -> Result<Resource, StoreError> {
        resource.normalize();
        resource.meta_mut().modified = Utc::now();

        let mut indices = self.write();
        let (lease, used_by) = match indices.by_id.get(resource.id()) {
            Some(existing) if existing.type_name() != resource.type_name() => {
                return Err(ModelError::validation(format!(
                    "resource {} already exists as {}",
                    resource.id(),
                    existing.type_name()
                ))
                .into());
            }
            Some(existing) => (existing.status().lease, existing.status().used_by.clone()),
            None => (LeaseState::Free, String::new()),
        };
        let status = resource.update_status();
        status.lease = lease;
        status.used_by = used_by;
        resource.validate(&self.ctx)?;

        self.files.create(&resource)?;
        debug!(id = %resource.id(), kind = %resource.type_name(), "resource upserted");
        indices.insert(resource.clone());
        Ok(resource)
    }

    fn delete(&self, id: &str) -> Result<Resource, StoreError> {
        let mut indices = self.write();
        if !indices.by_id.contains_key(id) {
            return Err(StoreError::NotFound(id.to_string()));
        }
        self.files.delete(id)?;
        indices
            .remove(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn get(&self, id: &str) -> Option<Resource> {
        self.read().by_id.get(id).cloned()
    }

    fn query(&self) -> ResourceMap {
        let indices = self.read();
        indices.collect(indices.all_ids())
    }

    fn query_uuid(&self, ids: &[String]) -> ResourceMap {
        self.read().collect(ids)
    }

    fn query_type(&self, types: &[String]) -> ResourceMap {
        let indices = self.read();
        indices.collect(
            types
                .iter()
                .filter_map(|t| indices.by_type.get(t))
                .flatten(),
        )
    }

    fn query_label(&self, query: &Query) -> Result<ResourceMap, StoreError> {
        query.validate()?;
        let indices = self.read();
        if query.selects_everything() {
            return Ok(indices.collect(indices.all_ids()));
        }
        let Some(values) = indices.by_label.get(&query.key) else {
            return Ok(ResourceMap::new());
        };

        let ids = values
            .iter()
            .filter(|(value, _)| query.matches(Some(value.as_str())))
            .flat_map(|(_, ids)| ids);
        Ok(indices.collect(ids))
    }

    fn query_property(&self, query: &Query) -> Result<ResourceMap, StoreError> {
        query.validate()?;
        let snapshot = self.query();
        Ok(filter(Axis::Property, query, &snapshot))
    }

    fn free_resources(&self, ids: &[String]) -> Result<(), StoreError> {
        let mut indices = self.write();
        let mut last_error = None;

        for id in ids {
            let Some(current) = indices.by_id.get(id) else {
                continue;
            };
            if current.status().lease == LeaseState::Free && current.status().used_by.is_empty()
            {
                continue;
            }

            let mut freed = current.clone();
            let status = freed.update_status();
            status.lease = LeaseState::Free;
            status.used_by.clear();
            freed.meta_mut().modified = Utc::now();

            match self.files.create(&freed) {
                Ok(()) => {
                    indices.by_id.insert(id.clone(), freed);
                }
                Err(e) => {
                    warn!(id = %id, error = %e, "failed to persist freed resource");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn acquire(&self, id: &str, owner: &str) -> Result<Option<Resource>, StoreError> {
        let mut indices = self.write();
        let Some(current) = indices.by_id.get(id) else {
            return Ok(None);
        };
        if !current.status().is_free() {
            return Ok(None);
        }

        let mut claimed = current.clone();
        let status = claimed.update_status();
        status.lease = LeaseState::Leased;
        status.used_by = owner.to_string();
        claimed.meta_mut().modified = Utc::now();

        self.files.create(&claimed)?;
        indices.by_id.insert(id.to_string(), claimed.clone());
        Ok(Some(claimed))
    }

    fn label_values(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.read()
            .by_label
            .iter()
            .map(|(key, values)| (key.clone(), values.keys().cloned().collect()))
            .collect()
    }

    fn is_writable(&self) -> bool {
        self.files.is_writable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::factory::{RACK, SERVER};
    use crate::models::{Op, GROUP_LABEL};
    use serde_json::json;
    use tempfile::TempDir;

    fn group_query(group: &str) -> Query {
        Query::eq(GROUP_LABEL, group)
    }

    fn server(group: &str) -> Resource {
        serde_json::from_value(json!({
            "type": {"name": SERVER, "description": "physical server"},
            "labels": {"system.group": group, "row": "1"},
            "serial": "SN-1",
            "boardIP": "10.0.0.5",
            "credentials": {"loginID": "root", "keys": {"password": "Sup3rSecret!x"}}
        }))
        .unwrap()
    }

    fn rack(group: &str) -> Resource {
        serde_json::from_value(json!({
            "type": {"name": RACK, "description": "rack"},
            "labels": {"system.group": group},
            "row": 4
        }))
        .unwrap()
    }

    fn open() -> (TempDir, IndexedStore) {
        let dir = TempDir::new().unwrap();
        let (store, err) = IndexedStore::open(dir.path(), ValidationContext::default()).unwrap();
        assert!(err.is_none());
        (dir, store)
    }

    #[test]
    fn test_created_resource_is_found_by_id_and_labels() {
        let (_dir, store) = open();
        let r = server("sj14");
        store.create(r.clone()).unwrap();

        let by_id = store.query_uuid(&[r.id().to_string()]);
        assert_eq!(by_id.len(), 1);
        assert_eq!(by_id.iter().next().unwrap().id(), r.id());

        for (k, v) in &r.meta().labels {
            let found = store.query_label(&Query::eq(k, v)).unwrap();
            assert!(found.contains(r.id()), "label {}={} missed", k, v);
        }
    }

    #[test]
    fn test_create_delete_create_is_idempotent() {
        let (_dir, store) = open();
        let r = server("sj14");
        store.create(r.clone()).unwrap();
        store.delete(r.id()).unwrap();
        store.create(r.clone()).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.query_type(&[SERVER.to_string()]).len(), 1);
        assert_eq!(store.query_label(&group_query("sj14")).unwrap().len(), 1);
        assert_eq!(store.label_values()["system.group"].len(), 1);
    }

    #[test]
    fn test_replace_refreshes_label_index() {
        let (_dir, store) = open();
        let mut r = server("sj14");
        store.create(r.clone()).unwrap();
        r.meta_mut()
            .labels
            .insert("system.group".to_string(), "sj18".to_string());
        store.create(r.clone()).unwrap();

        assert!(store.query_label(&group_query("sj14")).unwrap().is_empty());
        assert_eq!(store.query_label(&group_query("sj18")).unwrap().len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_delete_unknown_is_not_found() {
        let (_dir, store) = open();
        assert!(matches!(
            store.delete("abcdef12345"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_invalid_resource_rejected() {
        let (_dir, store) = open();
        let mut r = rack("g1");
        r.meta_mut().labels.clear();
        assert!(matches!(store.create(r), Err(StoreError::Model(_))));
        assert!(store.is_empty());
    }

    #[test]
    fn test_query_results_are_copies() {
        let (_dir, store) = open();
        let r = rack("g1");
        store.create(r.clone()).unwrap();

        let before = store.query();
        store.acquire(r.id(), "u@x").unwrap().unwrap();
        assert!(before.find(r.id()).unwrap().status().is_free());
        assert!(!store.get(r.id()).unwrap().status().is_free());
    }

    #[test]
    fn test_label_negation_semantics() {
        let (_dir, store) = open();
        store.create(server("sj14")).unwrap();
        store.create(rack("sj18")).unwrap();

        let q = Query::new("row", Op::NotEqual, &["2"]);
        assert_eq!(store.query_label(&q).unwrap().len(), 1);

        let q = Query::new("row", Op::NotIn, &[]);
        assert_eq!(store.query_label(&q).unwrap().len(), 2);

        let bad = Query::new("row", Op::Equal, &["1", "2"]);
        assert!(store.query_label(&bad).is_err());
    }

    #[test]
    fn test_acquire_and_free() {
        let (_dir, store) = open();
        let r = rack("g1");
        store.create(r.clone()).unwrap();

        let claimed = store.acquire(r.id(), "u@x").unwrap().unwrap();
        assert_eq!(claimed.status().lease, LeaseState::Leased);
        assert_eq!(claimed.status().used_by, "u@x");
        assert!(store.acquire(r.id(), "v@x").unwrap().is_none());
        assert!(store.acquire("abcdef12345", "v@x").unwrap().is_none());

        store
            .free_resources(&[r.id().to_string(), "abcdef12345".to_string()])
            .unwrap();
        let freed = store.get(r.id()).unwrap();
        assert_eq!(freed.status().lease, LeaseState::Free);
        assert_eq!(freed.status().used_by, "");
    }

    #[test]
    fn test_upsert_keeps_lease_state_claimed_after_read() {
        let (_dir, store) = open();
        let r = rack("g1");
        store.create(r.clone()).unwrap();

        // 调用方读到的快照仍是空闲，随后资源被租出
        let mut stale = store.get(r.id()).unwrap();
        store.acquire(r.id(), "u@x").unwrap().unwrap();

        stale.meta_mut().labels.insert("row".to_string(), "7".to_string());
        let stored = store.upsert(stale).unwrap();
        assert_eq!(stored.status().lease, LeaseState::Leased);
        assert_eq!(stored.status().used_by, "u@x");

        let current = store.get(r.id()).unwrap();
        assert_eq!(current.status().lease, LeaseState::Leased);
        assert_eq!(current.status().used_by, "u@x");
        assert_eq!(current.meta().labels["row"], "7");
        assert!(store.acquire(r.id(), "v@x").unwrap().is_none());
    }

    #[test]
    fn test_upsert_new_record_starts_free() {
        let (_dir, store) = open();
        let mut r = rack("g1");
        let status = r.update_status();
        status.lease = LeaseState::Leased;
        status.used_by = "forged@x".to_string();

        let stored = store.upsert(r).unwrap();
        assert!(stored.status().is_free());
        assert_eq!(stored.status().used_by, "");
    }

    #[test]
    fn test_upsert_rejects_type_change() {
        let (_dir, store) = open();
        let r = rack("g1");
        store.create(r.clone()).unwrap();

        let mut other = server("g1");
        other.meta_mut().id = r.id().to_string();
        assert!(matches!(store.upsert(other), Err(StoreError::Model(_))));
        assert_eq!(store.get(r.id()).unwrap().type_name(), RACK);
    }

    #[test]
    fn test_reopen_restores_indices() {
        let dir = TempDir::new().unwrap();
        let ids: Vec<String> = {
            let (store, _) = IndexedStore::open(dir.path(), ValidationContext::default()).unwrap();
            let resources = vec![server("sj14"), rack("sj18"), rack("sj18")];
            for r in &resources {
                store.create(r.clone()).unwrap();
            }
            store.acquire(resources[1].id(), "u@x").unwrap();
            resources.iter().map(|r| r.id().to_string()).collect()
        };

        let (store, err) = IndexedStore::open(dir.path(), ValidationContext::default()).unwrap();
        assert!(err.is_none());
        assert_eq!(store.query_uuid(&ids).len(), 3);
        assert_eq!(store.query_label(&group_query("sj18")).unwrap().len(), 2);
        assert_eq!(store.get(&ids[1]).unwrap().status().used_by, "u@x");
    }

    #[test]
    fn test_property_query() {
        let (_dir, store) = open();
        store.create(server("sj14")).unwrap();
        store.create(rack("sj14")).unwrap();
        let found = store.query_property(&Query::eq("Serial", "SN-1")).unwrap();
        assert_eq!(found.types().collect::<Vec<_>>(), vec![SERVER]);
    }
}
