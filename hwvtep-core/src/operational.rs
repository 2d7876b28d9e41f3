//! Operational view of device contents.
use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use entity_ownership::Entity;
use ovsdb_ops::Row;
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::node::NodeId;

/// Store of what each device currently holds.
#[async_trait]
pub trait OperationalStore: Send + Sync {
    /// Drops everything stored for the device behind `entity`. Calling it again
    /// for the same entity must have no further effect.
    async fn cleanup(&self, entity: &Entity) -> Result<()>;

    /// Current contents of the device `node_id`, empty if unknown.
    async fn snapshot(&self, node_id: &NodeId) -> Result<OperationalState>;
}

/// Rows of one device, by table and row uuid.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationalState {
    tables: BTreeMap<String, BTreeMap<Uuid, Row>>,
}

impl OperationalState {
    /// empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// rows of `table`
    pub fn rows<'a>(&'a self, table: &str) -> impl Iterator<Item = (&'a Uuid, &'a Row)> + 'a {
        self.tables.get(table).into_iter().flat_map(|rows| rows.iter())
    }

    /// one row by uuid
    pub fn row(&self, table: &str, uuid: &Uuid) -> Option<&Row> {
        self.tables.get(table)?.get(uuid)
    }

    /// First row of `table` whose `column` is the string `value`.
    pub fn find(&self, table: &str, column: &str, value: &str) -> Option<(&Uuid, &Row)> {
        self.rows(table)
            .find(|(_, row)| row.get(column).and_then(|v| v.as_str()) == Some(value))
    }

    /// inserts or replaces a row
    pub fn put_row(&mut self, table: impl Into<String>, uuid: Uuid, row: Row) {
        self.tables.entry(table.into()).or_default().insert(uuid, row);
    }

    /// removes a row
    pub fn remove_row(&mut self, table: &str, uuid: &Uuid) -> Option<Row> {
        let rows = self.tables.get_mut(table)?;
        let removed = rows.remove(uuid);
        if rows.is_empty() {
            self.tables.remove(table);
        }
        removed
    }

    /// no rows at all
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// In-memory [`OperationalStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryOperationalStore {
    inner: Arc<Mutex<BTreeMap<NodeId, OperationalState>>>,
}

impl MemoryOperationalStore {
    /// empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies `f` to the state of `node_id`, creating it if needed.
    pub fn update<F>(&self, node_id: &NodeId, f: F)
    where
        F: FnOnce(&mut OperationalState),
    {
        let mut inner = self.inner.lock();
        let state = inner.entry(node_id.clone()).or_default();
        f(state);
        if state.is_empty() {
            inner.remove(node_id);
        }
    }

    /// whether anything is stored for `node_id`
    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.inner.lock().contains_key(node_id)
    }

    /// number of devices with stored state
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// nothing stored
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[async_trait]
impl OperationalStore for MemoryOperationalStore {
    async fn cleanup(&self, entity: &Entity) -> Result<()> {
        let node_id = NodeId::from(entity);
        let removed = self.inner.lock().remove(&node_id);
        debug!(%entity, removed = removed.is_some(), "operational state cleaned up");
        Ok(())
    }

    async fn snapshot(&self, node_id: &NodeId) -> Result<OperationalState> {
        Ok(self
            .inner
            .lock()
            .get(node_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use ovsdb_ops::Value;

    use super::*;

    fn switch_row(name: &str) -> Row {
        let mut row = Row::new();
        row.insert("name".into(), Value::from(name));
        row
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let store = MemoryOperationalStore::new();
        let node_id = NodeId::new("hwvtep://uuid/a");
        let other = NodeId::new("hwvtep://uuid/b");
        store.update(&node_id, |state| {
            state.put_row("Physical_Switch", Uuid::new_v4(), switch_row("ps0"))
        });
        store.update(&other, |state| {
            state.put_row("Physical_Switch", Uuid::new_v4(), switch_row("ps1"))
        });

        let entity = node_id.to_entity("hwvtep");
        store.cleanup(&entity).await.unwrap();
        let after_first = store.snapshot(&other).await.unwrap();
        assert!(!store.contains(&node_id));

        store.cleanup(&entity).await.unwrap();
        assert!(!store.contains(&node_id));
        assert_eq!(store.len(), 1);
        assert_eq!(store.snapshot(&other).await.unwrap(), after_first);
    }

    #[tokio::test]
    async fn test_snapshot_and_find() {
        let store = MemoryOperationalStore::new();
        let node_id = NodeId::new("hwvtep://uuid/a");
        let uuid = Uuid::new_v4();
        store.update(&node_id, |state| state.put_row("Logical_Switch", uuid, switch_row("ls0")));

        let state = store.snapshot(&node_id).await.unwrap();
        assert_eq!(state.find("Logical_Switch", "name", "ls0").map(|(u, _)| *u), Some(uuid));
        assert!(state.find("Logical_Switch", "name", "ls1").is_none());
        assert!(store.snapshot(&NodeId::new("unknown")).await.unwrap().is_empty());

        store.update(&node_id, |state| {
            state.remove_row("Logical_Switch", &uuid);
        });
        assert!(store.is_empty());
    }
}
