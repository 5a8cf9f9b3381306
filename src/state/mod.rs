//! State management for transactional savepoints and rollback (spec §4.4).
//!
//! Grounded on `state/base.py::StateManager`/`BaseStateManager`: the Python
//! original expresses the contract as a `Protocol` plus an `ABC` carrying
//! `connection_url`/`_connected`/`_checkpoints` bookkeeping shared by every
//! backend. Ported here as a single async trait — Rust has no ABC-with-
//! shared-fields idiom, so the bookkeeping each implementation needs lives on
//! the implementation itself instead of a common base.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::errors::{ErrorContext, VenomError, VenomResult};

/// Connect/checkpoint/rollback/release/reset contract every backend
/// implements. A journey's runner holds one instance per invocation; the
/// branch walk calls `checkpoint`/`rollback` around each fan-out (spec
/// §4.2).
#[async_trait]
pub trait StateManager: Send + Sync {
    async fn connect(&mut self) -> VenomResult<()>;
    async fn disconnect(&mut self) -> VenomResult<()>;

    /// Creates a named savepoint against the current state.
    async fn checkpoint(&mut self, name: &str) -> VenomResult<()>;

    /// Rolls back to a previously created checkpoint, discarding any
    /// checkpoints created after it.
    async fn rollback(&mut self, name: &str) -> VenomResult<()>;

    /// Releases a checkpoint, freeing whatever resources it held, without
    /// rolling back to it.
    async fn release(&mut self, name: &str) -> VenomResult<()>;

    /// Discards all state and checkpoints, returning to the manager's
    /// initial condition.
    async fn reset(&mut self) -> VenomResult<()>;

    fn is_connected(&self) -> bool;
}

fn not_connected() -> VenomError {
    VenomError::StateNotConnected {
        context: ErrorContext::new(),
    }
}

/// Sanitizes a checkpoint name for use as an identifier: non-alphanumeric
/// characters become `_`, a leading digit gets an `sp_` guard, then the
/// given prefix is applied. Ports `InMemoryStateManager._sanitize_name` /
/// `PostgreSQLStateManager._sanitize_name`, which differ only in prefix and
/// in the SQL backends' additional 63-byte identifier truncation (Postgres's
/// `NAMEDATALEN` limit).
fn sanitize_name(name: &str, prefix: &str, max_len: Option<usize>) -> String {
    let mut safe: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if safe.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
        safe = format!("sp_{safe}");
    }
    let full = format!("{prefix}{safe}");
    match max_len {
        Some(max) if full.len() > max => {
            // `max` is a byte offset; back it up to the nearest char
            // boundary so a multi-byte character straddling the cap
            // doesn't panic the slice (non-alphanumeric characters are
            // replaced above, but `is_alphanumeric` passes through
            // non-ASCII letters unchanged).
            let mut end = max;
            while end > 0 && !full.is_char_boundary(end) {
                end -= 1;
            }
            full[..end].to_string()
        }
        _ => full,
    }
}

/// In-memory state manager using JSON-value snapshots. Ports
/// `InMemoryStateManager`: no persistence, deep-copy snapshots, ideal for
/// unit tests where database speed matters but real SQL behavior doesn't.
pub struct InMemoryStateManager {
    initial_state: Value,
    data: Value,
    snapshots: HashMap<String, Value>,
    checkpoints: Vec<String>,
    connected: bool,
}

impl InMemoryStateManager {
    pub fn new() -> Self {
        Self::with_initial_state(Value::Object(Map::new()))
    }

    pub fn with_initial_state(initial_state: Value) -> Self {
        Self {
            initial_state,
            data: Value::Object(Map::new()),
            snapshots: HashMap::new(),
            checkpoints: Vec::new(),
            connected: false,
        }
    }

    fn ensure_connected(&self) -> VenomResult<()> {
        if self.connected {
            Ok(())
        } else {
            Err(not_connected())
        }
    }

    /// Current data snapshot, for test assertions. Ports `get_data`.
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Directly sets the data state, for test setup. Ports `set_data`.
    pub fn set_data(&mut self, data: Value) {
        self.data = data;
    }

    pub fn get_value(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn update_data(&mut self, key: impl Into<String>, value: Value) {
        if let Value::Object(map) = &mut self.data {
            map.insert(key.into(), value);
        }
    }

    fn sanitize(name: &str) -> String {
        sanitize_name(name, "mem_", None)
    }
}

impl Default for InMemoryStateManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateManager for InMemoryStateManager {
    async fn connect(&mut self) -> VenomResult<()> {
        self.data = self.initial_state.clone();
        self.snapshots.clear();
        self.checkpoints.clear();
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> VenomResult<()> {
        self.data = Value::Object(Map::new());
        self.snapshots.clear();
        self.checkpoints.clear();
        self.connected = false;
        Ok(())
    }

    async fn checkpoint(&mut self, name: &str) -> VenomResult<()> {
        self.ensure_connected()?;
        let safe_name = Self::sanitize(name);
        self.snapshots.insert(safe_name.clone(), self.data.clone());
        self.checkpoints.push(safe_name);
        Ok(())
    }

    async fn rollback(&mut self, name: &str) -> VenomResult<()> {
        self.ensure_connected()?;
        let safe_name = Self::sanitize(name);

        let snapshot = self.snapshots.get(&safe_name).cloned().ok_or_else(|| {
            VenomError::RollbackFailed {
                message: format!("checkpoint '{name}' not found"),
                context: ErrorContext::new().with_path(name.to_string()),
            }
        })?;

        let idx = self
            .checkpoints
            .iter()
            .position(|c| c == &safe_name)
            .expect("snapshot existed, so the checkpoint name must too");
        for discarded in self.checkpoints.split_off(idx + 1) {
            self.snapshots.remove(&discarded);
        }
        self.data = snapshot;
        Ok(())
    }

    async fn release(&mut self, name: &str) -> VenomResult<()> {
        self.ensure_connected()?;
        let safe_name = Self::sanitize(name);
        self.snapshots.remove(&safe_name);
        self.checkpoints.retain(|c| c != &safe_name);
        Ok(())
    }

    async fn reset(&mut self) -> VenomResult<()> {
        self.ensure_connected()?;
        self.data = self.initial_state.clone();
        self.snapshots.clear();
        self.checkpoints.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Executes a single SQL statement against a connection this crate does not
/// own the shape of. Kept deliberately narrow — just enough for the
/// `SAVEPOINT` grammar below — so a caller can adapt it to whichever SQL
/// driver their deployment already depends on without this crate picking
/// one for them.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> VenomResult<()>;
}

/// Savepoint-backed state manager generic over any [`SqlExecutor`]. Ports
/// `PostgreSQLStateManager`/`MySQLStateManager`/`SQLiteStateManager`, which
/// differ only in identifier prefix/length limits and reset strategy — all
/// three issue the same `SAVEPOINT name` / `ROLLBACK TO SAVEPOINT name` /
/// `RELEASE SAVEPOINT name` statements, which is the part this crate treats
/// as normative.
///
/// `reset` issues `DELETE FROM {table}` for each configured table rather
/// than Postgres's `TRUNCATE ... CASCADE`, since `TRUNCATE` is not portable
/// to SQLite and `DELETE FROM` is accepted by all three dialects; a caller
/// that wants `TRUNCATE`'s sequence-reset behavior on Postgres specifically
/// can issue it directly through the same `SqlExecutor`.
pub struct SqlSavepointStateManager<E: SqlExecutor> {
    executor: E,
    tables_to_reset: Vec<String>,
    checkpoints: Vec<String>,
    connected: bool,
}

impl<E: SqlExecutor> SqlSavepointStateManager<E> {
    pub fn new(executor: E, tables_to_reset: Vec<String>) -> Self {
        Self {
            executor,
            tables_to_reset,
            checkpoints: Vec::new(),
            connected: false,
        }
    }

    fn sanitize(name: &str) -> String {
        sanitize_name(name, "chk_", Some(63))
    }
}

#[async_trait]
impl<E: SqlExecutor> StateManager for SqlSavepointStateManager<E> {
    async fn connect(&mut self) -> VenomResult<()> {
        self.checkpoints.clear();
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> VenomResult<()> {
        self.checkpoints.clear();
        self.connected = false;
        Ok(())
    }

    async fn checkpoint(&mut self, name: &str) -> VenomResult<()> {
        if !self.connected {
            return Err(not_connected());
        }
        let safe_name = Self::sanitize(name);
        self.executor
            .execute(&format!("SAVEPOINT {safe_name}"))
            .await
            .map_err(|e| VenomError::CheckpointFailed {
                message: e.to_string(),
                context: ErrorContext::new().with_path(name.to_string()),
            })?;
        self.checkpoints.push(safe_name);
        Ok(())
    }

    async fn rollback(&mut self, name: &str) -> VenomResult<()> {
        if !self.connected {
            return Err(not_connected());
        }
        let safe_name = Self::sanitize(name);
        if !self.checkpoints.contains(&safe_name) {
            return Err(VenomError::RollbackFailed {
                message: format!("checkpoint '{name}' not found"),
                context: ErrorContext::new().with_path(name.to_string()),
            });
        }
        self.executor
            .execute(&format!("ROLLBACK TO SAVEPOINT {safe_name}"))
            .await
            .map_err(|e| VenomError::RollbackFailed {
                message: e.to_string(),
                context: ErrorContext::new().with_path(name.to_string()),
            })?;
        let idx = self
            .checkpoints
            .iter()
            .position(|c| c == &safe_name)
            .expect("checked above");
        self.checkpoints.truncate(idx + 1);
        Ok(())
    }

    async fn release(&mut self, name: &str) -> VenomResult<()> {
        if !self.connected {
            return Err(not_connected());
        }
        let safe_name = Self::sanitize(name);
        self.executor
            .execute(&format!("RELEASE SAVEPOINT {safe_name}"))
            .await
            .map_err(|e| VenomError::CheckpointFailed {
                message: e.to_string(),
                context: ErrorContext::new().with_path(name.to_string()),
            })?;
        self.checkpoints.retain(|c| c != &safe_name);
        Ok(())
    }

    async fn reset(&mut self) -> VenomResult<()> {
        if !self.connected {
            return Err(not_connected());
        }
        for table in &self.tables_to_reset {
            self.executor
                .execute(&format!("DELETE FROM {table}"))
                .await
                .map_err(|e| VenomError::ResetFailed {
                    message: e.to_string(),
                    context: ErrorContext::new(),
                })?;
        }
        self.checkpoints.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn sanitize_name_truncates_on_a_char_boundary() {
        let name: String = std::iter::repeat('é').take(70).collect();
        let safe = sanitize_name(&name, "chk_", Some(63));
        assert!(safe.len() <= 63);
        assert!(safe.is_char_boundary(safe.len()));
    }

    #[tokio::test]
    async fn checkpoint_then_rollback_restores_prior_data() {
        let mut mgr = InMemoryStateManager::new();
        mgr.connect().await.unwrap();
        mgr.update_data("count", Value::from(1));
        mgr.checkpoint("before_update").await.unwrap();
        mgr.update_data("count", Value::from(2));

        mgr.rollback("before_update").await.unwrap();
        assert_eq!(mgr.get_value("count"), Some(&Value::from(1)));
    }

    #[tokio::test]
    async fn rollback_discards_later_checkpoints() {
        let mut mgr = InMemoryStateManager::new();
        mgr.connect().await.unwrap();
        mgr.checkpoint("a").await.unwrap();
        mgr.update_data("x", Value::from(1));
        mgr.checkpoint("b").await.unwrap();

        mgr.rollback("a").await.unwrap();
        assert!(mgr.rollback("b").await.is_err());
    }

    #[tokio::test]
    async fn rollback_to_unknown_checkpoint_fails() {
        let mut mgr = InMemoryStateManager::new();
        mgr.connect().await.unwrap();
        assert!(mgr.rollback("nope").await.is_err());
    }

    #[tokio::test]
    async fn operations_require_connection() {
        let mut mgr = InMemoryStateManager::new();
        assert!(mgr.checkpoint("x").await.is_err());
    }

    #[tokio::test]
    async fn reset_restores_initial_state() {
        let mut mgr = InMemoryStateManager::with_initial_state(serde_json::json!({"seeded": true}));
        mgr.connect().await.unwrap();
        mgr.update_data("extra", Value::from(1));
        mgr.reset().await.unwrap();
        assert_eq!(mgr.get_value("seeded"), Some(&Value::from(true)));
        assert_eq!(mgr.get_value("extra"), None);
    }

    struct RecordingExecutor {
        statements: Mutex<Vec<String>>,
    }

    impl RecordingExecutor {
        fn new() -> Self {
            Self { statements: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl SqlExecutor for RecordingExecutor {
        async fn execute(&self, sql: &str) -> VenomResult<()> {
            self.statements.lock().unwrap().push(sql.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn sql_savepoint_manager_issues_savepoint_grammar() {
        let mut mgr = SqlSavepointStateManager::new(RecordingExecutor::new(), vec!["users".into()]);
        mgr.connect().await.unwrap();
        mgr.checkpoint("step-1").await.unwrap();
        mgr.rollback("step-1").await.unwrap();
        mgr.release("step-1").await.unwrap();

        let statements = mgr.executor.statements.lock().unwrap().clone();
        assert_eq!(statements[0], "SAVEPOINT chk_step_1");
        assert_eq!(statements[1], "ROLLBACK TO SAVEPOINT chk_step_1");
        assert_eq!(statements[2], "RELEASE SAVEPOINT chk_step_1");
    }

    #[tokio::test]
    async fn reset_deletes_from_configured_tables() {
        let mut mgr = SqlSavepointStateManager::new(RecordingExecutor::new(), vec!["orders".into(), "users".into()]);
        mgr.connect().await.unwrap();
        mgr.reset().await.unwrap();
        let statements = mgr.executor.statements.lock().unwrap().clone();
        assert_eq!(statements, vec!["DELETE FROM orders", "DELETE FROM users"]);
    }
}
