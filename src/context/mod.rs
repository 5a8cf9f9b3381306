//! The execution context: a typed key-value bag with a parallel step-result
//! sub-index, snapshot/restore, and fork semantics (spec §3
//! "ExecutionContext", §9 "Snapshot semantics").
//!
//! Grounded on `core/context.py::ExecutionContext`, but re-architected per
//! the spec's design note: the Python original defers its deep copy from
//! `snapshot()` to `restore()` to avoid O(n) work on every checkpoint. A
//! systems-language port has a different cost model, so this stores `_data`
//! and `_step_results` behind `Arc` and mutates through `Arc::make_mut`
//! (copy-on-write). `snapshot()` and `restore()` are both O(1) — they only
//! clone the `Arc` pointer — and a mutation after a fork pays the O(n) copy
//! exactly once, only if the map is still shared. This is the "immutable
//! persistent map" the design note recommends, without pulling in a
//! standalone persistent-map crate the rest of the stack doesn't use.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

/// Per-journey (or per-path) key-value bag. Not thread-safe by design
/// (spec §5 "`ExecutionContext` is NOT thread-safe; each concurrent journey
/// invocation has its own").
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    data: Arc<HashMap<String, Value>>,
    step_results: Arc<HashMap<String, Value>>,
}

/// Opaque capture of a context's state at a point in time. Cheap to create
/// (`Arc` clone); `restore` from one is equally cheap.
#[derive(Debug, Clone)]
pub struct ContextSnapshot {
    data: Arc<HashMap<String, Value>>,
    step_results: Arc<HashMap<String, Value>>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        Arc::make_mut(&mut self.data).insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.data.get(key).cloned().unwrap_or(default)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        Arc::make_mut(&mut self.data).remove(key)
    }

    /// Stores a step's return value, both under the step name in the
    /// general data map (so later steps can reference it by name) and in
    /// the step-result sub-index (spec §3: "a parallel 'step-result'
    /// sub-index (key = step name)").
    pub fn store_step_result(&mut self, step_name: &str, value: Value) {
        Arc::make_mut(&mut self.step_results).insert(step_name.to_string(), value.clone());
        Arc::make_mut(&mut self.data).insert(step_name.to_string(), value);
    }

    pub fn get_step_result(&self, step_name: &str) -> Option<&Value> {
        self.step_results.get(step_name)
    }

    pub fn has_step_result(&self, step_name: &str) -> bool {
        self.step_results.contains_key(step_name)
    }

    pub fn keys(&self) -> Vec<&String> {
        self.data.keys().collect()
    }

    pub fn step_names(&self) -> Vec<&String> {
        self.step_results.keys().collect()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Shallow (`Arc`-pointer) capture of the current state. O(1).
    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            data: self.data.clone(),
            step_results: self.step_results.clone(),
        }
    }

    /// Replaces this context's state with a prior snapshot's. O(1);
    /// observationally independent of later mutations to either side
    /// because any subsequent `set`/`store_step_result` triggers a
    /// copy-on-write rather than mutating the shared map in place.
    pub fn restore(&mut self, snapshot: &ContextSnapshot) {
        self.data = snapshot.data.clone();
        self.step_results = snapshot.step_results.clone();
    }

    /// Forks an independent child context — used when a branch fans a
    /// trunk context out into per-path contexts (spec §4.2 step 1). Cloning
    /// the `Arc`s is O(1); the fork is fully independent once either side
    /// mutates.
    pub fn fork(&self) -> Self {
        self.clone()
    }

    /// Merges another context's entries into this one. Not used by the
    /// runner itself (trunk and path contexts are never merged — spec
    /// §4.2), but kept as a small utility for callers composing contexts
    /// outside the branch walk, mirroring `core/context.py::merge`.
    pub fn merge(&mut self, other: &ExecutionContext, overwrite: bool) {
        let data = Arc::make_mut(&mut self.data);
        for (k, v) in other.data.iter() {
            if overwrite || !data.contains_key(k) {
                data.insert(k.clone(), v.clone());
            }
        }
        let step_results = Arc::make_mut(&mut self.step_results);
        for (k, v) in other.step_results.iter() {
            if overwrite || !step_results.contains_key(k) {
                step_results.insert(k.clone(), v.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_then_restore_is_observationally_independent() {
        let mut ctx = ExecutionContext::new();
        ctx.set("a", Value::from(1));
        let snap = ctx.snapshot();

        ctx.set("a", Value::from(2));
        ctx.set("b", Value::from("new"));
        assert_eq!(ctx.get("a"), Some(&Value::from(2)));

        ctx.restore(&snap);
        assert_eq!(ctx.get("a"), Some(&Value::from(1)));
        assert_eq!(ctx.get("b"), None);
    }

    #[test]
    fn fork_is_independent_of_trunk() {
        let mut trunk = ExecutionContext::new();
        trunk.set("shared", Value::from("trunk"));

        let mut forked = trunk.fork();
        forked.set("shared", Value::from("path"));
        forked.set("only_in_path", Value::from(true));

        assert_eq!(trunk.get("shared"), Some(&Value::from("trunk")));
        assert_eq!(trunk.get("only_in_path"), None);
        assert_eq!(forked.get("shared"), Some(&Value::from("path")));
    }

    #[test]
    fn restoring_into_one_fork_does_not_affect_a_sibling() {
        let mut trunk = ExecutionContext::new();
        trunk.set("x", Value::from(0));
        let snap = trunk.snapshot();

        let mut path_a = trunk.fork();
        let mut path_b = trunk.fork();
        path_a.set("x", Value::from(1));
        path_b.set("x", Value::from(2));

        path_a.restore(&snap);
        assert_eq!(path_a.get("x"), Some(&Value::from(0)));
        assert_eq!(path_b.get("x"), Some(&Value::from(2)));
    }

    #[test]
    fn step_result_stored_in_both_indexes() {
        let mut ctx = ExecutionContext::new();
        ctx.store_step_result("create_user", serde_json::json!({"id": 1}));
        assert!(ctx.has_step_result("create_user"));
        assert_eq!(ctx.get("create_user"), ctx.get_step_result("create_user"));
    }
}
