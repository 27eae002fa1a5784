//! Query evaluation over a resource map

use crate::models::{Query, Resource, ResourceMap};
use serde_json::Value;

/// Which side of a resource a query key names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// `meta.labels`
    Label,
    /// A field of the concrete record, matched case-insensitively.
    Property,
}

/// Returns the subset of `resources` matching `query`. The query is assumed
/// to be validated already.
pub fn filter(axis: Axis, query: &Query, resources: &ResourceMap) -> ResourceMap {
    if query.selects_everything() {
        return resources.clone();
    }
    resources
        .iter()
        .filter(|r| matches(axis, query, r))
        .cloned()
        .collect()
}

pub fn matches(axis: Axis, query: &Query, resource: &Resource) -> bool {
    if query.selects_everything() {
        return true;
    }
    match axis {
        Axis::Label => query.matches(resource.meta().labels.get(&query.key).map(String::as_str)),
        Axis::Property => query.matches(property_value(resource, &query.key).as_deref()),
    }
}

/// Stringified value of the field named `key`, looked up on the record and
/// then on its status. Field names compare case-insensitively.
pub fn property_value(resource: &Resource, key: &str) -> Option<String> {
    let value = serde_json::to_value(resource).ok()?;
    let object = value.as_object()?;

    let found = lookup(object, key).or_else(|| {
        object
            .get("status")
            .and_then(Value::as_object)
            .and_then(|status| lookup(status, key))
    })?;

    match found {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Object(o) if key.eq_ignore_ascii_case("type") => {
            o.get("name").and_then(Value::as_str).map(str::to_string)
        }
        other => Some(other.to_string()),
    }
}

fn lookup<'a>(object: &'a serde_json::Map<String, Value>, key: &str) -> Option<&'a Value> {
    object
        .iter()
        .find(|(field, _)| field.eq_ignore_ascii_case(key))
        .map(|(_, v)| v)
}
