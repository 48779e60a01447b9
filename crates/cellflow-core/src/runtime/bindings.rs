//! The binding store: named values produced by cell execution.
//!
//! Backed by an `Arc<DashMap>` so read-side consumers (presentation layers,
//! executors resolving inputs) can hold cheap clones while the scheduler
//! stays the single writer. Single-owner-per-name is enforced here as a
//! second line of defense behind the graph's producer index.

use crate::runtime::cell::CellError;
use cellflow_engine::CellId;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// An opaque typed value handle. The core never looks inside `data`; only
/// the executor boundary produces and consumes it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Value {
    /// Declared type tag, e.g. the executor's runtime type name.
    pub tag: String,
    pub data: serde_json::Value,
}

impl Value {
    pub fn new(tag: impl Into<String>, data: serde_json::Value) -> Value {
        Value {
            tag: tag.into(),
            data,
        }
    }

    /// Convenience constructor tagging the value by its JSON type.
    pub fn json(data: serde_json::Value) -> Value {
        let tag = match &data {
            serde_json::Value::Null => "unit",
            serde_json::Value::Bool(_) => "bool",
            serde_json::Value::Number(_) => "number",
            serde_json::Value::String(_) => "string",
            serde_json::Value::Array(_) => "array",
            serde_json::Value::Object(_) => "map",
        };
        Value::new(tag, data)
    }
}

/// A named value produced by exactly one cell at a time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub name: String,
    pub owner: CellId,
    pub value: Value,
    /// Bumped on every write while the binding stays live; restarts at 1
    /// after the name is cleared.
    pub version: u64,
}

/// Shared store of live bindings (DashMap is internally Arc-based, clones
/// are cheap).
#[derive(Clone, Debug, Default)]
pub struct BindingStore {
    map: Arc<DashMap<String, Binding>>,
}

impl BindingStore {
    pub fn new() -> BindingStore {
        BindingStore::default()
    }

    /// Current value of a binding, if live.
    pub fn read(&self, name: &str) -> Option<Value> {
        self.map.get(name).map(|b| b.value.clone())
    }

    pub fn get(&self, name: &str) -> Option<Binding> {
        self.map.get(name).map(|b| b.clone())
    }

    /// Write a binding on behalf of `owner`. A live binding held by another
    /// cell is a conflict; ownership transfer requires the old owner's
    /// bindings to have been cleared first (delete or re-derived edit).
    pub fn write(
        &self,
        owner: &CellId,
        name: &str,
        value: Value,
    ) -> std::result::Result<u64, CellError> {
        let mut version = 1;
        if let Some(existing) = self.map.get(name) {
            if existing.owner != *owner {
                return Err(CellError::BindingConflict {
                    name: name.to_string(),
                    owner: existing.owner.clone(),
                });
            }
            version = existing.version + 1;
        }
        self.map.insert(
            name.to_string(),
            Binding {
                name: name.to_string(),
                owner: owner.clone(),
                value,
                version,
            },
        );
        Ok(version)
    }

    /// Drop every binding owned by `cell`, returning the removed names.
    ///
    /// Runs before each re-execution and on delete; this is what keeps
    /// stale values from leaking into later reads.
    pub fn clear_owned(&self, cell: &CellId) -> Vec<String> {
        let owned: Vec<String> = self
            .map
            .iter()
            .filter(|entry| entry.owner == *cell)
            .map(|entry| entry.name.clone())
            .collect();
        for name in &owned {
            self.map.remove(name);
        }
        owned
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    /// All live bindings sorted by name, for snapshots and persistence.
    pub fn export(&self) -> Vec<Binding> {
        let mut out: Vec<Binding> = self.map.iter().map(|entry| entry.clone()).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Replace the entire store contents (snapshot restore path).
    pub fn replace_all(&self, bindings: Vec<Binding>) {
        self.map.clear();
        for binding in bindings {
            self.map.insert(binding.name.clone(), binding);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id(s: &str) -> CellId {
        CellId::new(s)
    }

    #[test]
    fn test_write_bumps_version() {
        let store = BindingStore::new();
        assert_eq!(store.write(&id("a"), "x", Value::json(json!(1))).unwrap(), 1);
        assert_eq!(store.write(&id("a"), "x", Value::json(json!(2))).unwrap(), 2);
        assert_eq!(store.read("x").unwrap().data, json!(2));
    }

    #[test]
    fn test_foreign_owner_write_is_a_conflict() {
        let store = BindingStore::new();
        store.write(&id("a"), "x", Value::json(json!(1))).unwrap();
        let err = store.write(&id("b"), "x", Value::json(json!(2))).unwrap_err();
        assert_eq!(
            err,
            CellError::BindingConflict {
                name: "x".into(),
                owner: id("a"),
            }
        );
        // Loser's write must not land.
        assert_eq!(store.read("x").unwrap().data, json!(1));
    }

    #[test]
    fn test_clear_owned_removes_only_that_cells_bindings() {
        let store = BindingStore::new();
        store.write(&id("a"), "x", Value::json(json!(1))).unwrap();
        store.write(&id("a"), "y", Value::json(json!(2))).unwrap();
        store.write(&id("b"), "z", Value::json(json!(3))).unwrap();

        let removed = store.clear_owned(&id("a"));
        assert_eq!(removed.len(), 2);
        assert!(store.read("x").is_none());
        assert!(store.read("y").is_none());
        assert_eq!(store.read("z").unwrap().data, json!(3));
    }

    #[test]
    fn test_ownership_transfer_after_clear() {
        let store = BindingStore::new();
        store.write(&id("a"), "x", Value::json(json!(1))).unwrap();
        store.clear_owned(&id("a"));
        store.write(&id("b"), "x", Value::json(json!(2))).unwrap();
        assert_eq!(store.get("x").unwrap().owner, id("b"));
    }

    #[test]
    fn test_export_is_sorted_by_name() {
        let store = BindingStore::new();
        store.write(&id("a"), "z", Value::json(json!(1))).unwrap();
        store.write(&id("a"), "a", Value::json(json!(2))).unwrap();
        let exported = store.export();
        let names: Vec<&str> = exported.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["a", "z"]);
    }
}
