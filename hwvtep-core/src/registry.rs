//! Concurrent maps from device keys and entities to connection instances.
//!
//! Both maps are [`DashMap`]s: every insert and removal is atomic per key and
//! no lock spans the whole registry.
use std::sync::Arc;

use dashmap::DashMap;
use entity_ownership::Entity;
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::instance::ConnectionInstance;
use crate::key::DeviceKey;
use crate::metrics;
use crate::node::NodeId;

/// Entity to instance index used to resolve ownership notifications.
#[derive(Debug, Default)]
pub struct EntityIndex {
    map: DashMap<Entity, Arc<ConnectionInstance>>,
}

impl EntityIndex {
    /// empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// maps `entity` to `instance`, returning the previous instance
    pub fn insert(&self, entity: Entity, instance: Arc<ConnectionInstance>) -> Option<Arc<ConnectionInstance>> {
        self.map.insert(entity, instance)
    }

    /// instance registered for `entity`
    pub fn get(&self, entity: &Entity) -> Option<Arc<ConnectionInstance>> {
        self.map.get(entity).map(|entry| entry.value().clone())
    }

    /// Removes `entity` only while it still maps to `instance`.
    pub fn remove(&self, entity: &Entity, instance: &Arc<ConnectionInstance>) -> bool {
        self.map
            .remove_if(entity, |_, current| Arc::ptr_eq(current, instance))
            .is_some()
    }

    /// Instance with a candidacy for the device at `key`.
    pub fn find_by_key(&self, key: &DeviceKey) -> Option<Arc<ConnectionInstance>> {
        self.map
            .iter()
            .find(|entry| entry.value().key() == *key)
            .map(|entry| entry.value().clone())
    }

    /// Closes the candidacy of `instance` and drops its entity mapping.
    pub fn retract(&self, instance: &Arc<ConnectionInstance>) {
        if instance.close_registration() {
            metrics::OWNED_DEVICES.dec();
        }
        if let Some(entity) = instance.entity() {
            let removed = self.remove(&entity, instance);
            debug!(key = %instance.key(), %entity, removed, "candidacy retracted");
        }
    }

    /// every mapped instance, including candidates not yet in the registry
    pub fn instances(&self) -> Vec<Arc<ConnectionInstance>> {
        self.map.iter().map(|entry| entry.value().clone()).collect()
    }

    /// number of mapped entities
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// no entity mapped
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// What [`ConnectionRegistry::on_connected`] did.
#[derive(Debug)]
pub enum ConnectOutcome {
    /// the handle was already known; nothing changed
    Reused(Arc<ConnectionInstance>),
    /// a fresh instance, not yet registered
    Created {
        /// the new instance
        instance: Arc<ConnectionInstance>,
        /// the instance it replaced, already disconnected and retracted
        replaced: Option<Arc<ConnectionInstance>>,
    },
}

impl ConnectOutcome {
    /// the instance to use for the connection
    pub fn instance(&self) -> &Arc<ConnectionInstance> {
        match self {
            ConnectOutcome::Reused(instance) => instance,
            ConnectOutcome::Created { instance, .. } => instance,
        }
    }
}

/// At most one live instance per [`DeviceKey`].
#[derive(Debug)]
pub struct ConnectionRegistry {
    clients: DashMap<DeviceKey, Arc<ConnectionInstance>>,
    node_ids: DashMap<DeviceKey, NodeId>,
    entities: Arc<EntityIndex>,
    database: String,
}

impl ConnectionRegistry {
    /// registry sharing `entities` with the ownership arbiter
    pub fn new(entities: Arc<EntityIndex>, database: impl Into<String>) -> Self {
        Self {
            clients: DashMap::new(),
            node_ids: DashMap::new(),
            entities,
            database: database.into(),
        }
    }

    /// Handles a new transport session.
    ///
    /// Re-delivery of a known handle returns its instance unchanged. A
    /// different handle for the same device replaces the old instance: the old
    /// session is disconnected, its candidacy retracted and it is removed
    /// before the new instance is built. The new instance is not registered
    /// here; that happens once ownership is known.
    pub async fn on_connected(&self, client: Client) -> ConnectOutcome {
        let key = DeviceKey::from(client.connection_info());
        info!(%key, "device connected");

        // a candidate not yet registered here is still the live instance
        let existing = self.get(key).or_else(|| self.entities.find_by_key(&key));
        let mut replaced = None;
        if let Some(existing) = existing {
            if existing.has_client(&client) {
                warn!(%key, "connection instance already exists for client");
                return ConnectOutcome::Reused(existing);
            }
            warn!(%key, "connection instance being replaced with new client");
            existing.disconnect().await;
            self.entities.retract(&existing);
            self.remove_instance(key, &existing);
            metrics::REPLACED_CONNECTIONS.inc();
            replaced = Some(existing);
        }

        let instance = Arc::new(ConnectionInstance::new(
            client,
            self.node_id(key),
            self.database.as_str(),
        ));
        ConnectOutcome::Created { instance, replaced }
    }

    /// Handles the end of a transport session.
    ///
    /// Returns the instance that was removed. A session that is no longer
    /// current (already replaced or never registered) is logged and ignored.
    pub fn on_disconnected(&self, client: &Client) -> Option<Arc<ConnectionInstance>> {
        let info = client.connection_info();
        let key = DeviceKey::from(info);
        info!(%key, local = %info.local, "device disconnected, cleaning up");

        let current = self
            .get(key)
            .or_else(|| self.entities.find_by_key(&key))
            .filter(|instance| instance.has_client(client));
        let Some(instance) = current else {
            warn!(%key, "disconnect did not find a current connection instance");
            return None;
        };
        self.remove_instance(key, &instance);
        self.entities.retract(&instance);
        Some(instance)
    }

    /// instance for `key`
    pub fn get(&self, key: impl Into<DeviceKey>) -> Option<Arc<ConnectionInstance>> {
        self.clients.get(&key.into()).map(|entry| entry.value().clone())
    }

    /// registers `instance` under `key`
    pub fn put(&self, key: impl Into<DeviceKey>, instance: Arc<ConnectionInstance>) {
        let key = key.into();
        if self.clients.insert(key, instance).is_none() {
            debug!(%key, clients = self.clients.len(), "connection registered");
        }
        metrics::CONNECTED_DEVICES.set(self.clients.len() as i64);
    }

    /// removes whatever is registered under `key`
    pub fn remove(&self, key: impl Into<DeviceKey>) -> Option<Arc<ConnectionInstance>> {
        let key = key.into();
        let removed = self.clients.remove(&key).map(|(_, instance)| instance);
        metrics::CONNECTED_DEVICES.set(self.clients.len() as i64);
        debug!(%key, clients = self.clients.len(), "connection removed");
        removed
    }

    /// Removes `key` only while it still maps to `instance`.
    pub fn remove_instance(&self, key: DeviceKey, instance: &Arc<ConnectionInstance>) -> bool {
        let removed = self
            .clients
            .remove_if(&key, |_, current| Arc::ptr_eq(current, instance))
            .is_some();
        if removed {
            metrics::CONNECTED_DEVICES.set(self.clients.len() as i64);
            debug!(%key, clients = self.clients.len(), "connection removed");
        }
        removed
    }

    /// logical node id last recorded for `key`
    pub fn node_id(&self, key: impl Into<DeviceKey>) -> Option<NodeId> {
        self.node_ids.get(&key.into()).map(|entry| entry.value().clone())
    }

    /// records the logical node id of the device at `key`
    pub fn put_node_id(&self, key: impl Into<DeviceKey>, node_id: NodeId) {
        self.node_ids.insert(key.into(), node_id);
    }

    /// every registered instance
    pub fn instances(&self) -> Vec<Arc<ConnectionInstance>> {
        self.clients
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// number of registered instances
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// nothing registered
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// the shared entity index
    pub fn entities(&self) -> &Arc<EntityIndex> {
        &self.entities
    }
}
