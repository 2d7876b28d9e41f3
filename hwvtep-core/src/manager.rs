//! Device manager: the entry point the transport and the rest of the
//! controller talk to.
use std::sync::Arc;

use anyhow::Result;
use entity_ownership::OwnershipService;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::client::Client;
use crate::command::TransactCommand;
use crate::config::DeviceSettings;
use crate::instance::ConnectionInstance;
use crate::key::DeviceKey;
use crate::metrics;
use crate::node::{DeviceNode, NodeId, NodeModification};
use crate::operational::{MemoryOperationalStore, OperationalStore};
use crate::ownership::{
    CandidacyOutcome, CommandRegistration, MonitorRegistration, OwnershipArbiter, OwnershipListener,
};
use crate::reconciliation::{ConfigurationReconciler, ReconciliationTrigger, ReplayTasks};
use crate::registry::{ConnectOutcome, ConnectionRegistry, EntityIndex};

/// Builds a [`DeviceManager`].
pub struct DeviceManagerBuilder {
    settings: DeviceSettings,
    service: Arc<dyn OwnershipService>,
    store: Option<Arc<dyn OperationalStore>>,
    registration: Option<Arc<dyn CommandRegistration>>,
    commands: Vec<Arc<dyn TransactCommand>>,
}

impl std::fmt::Debug for DeviceManagerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceManagerBuilder")
            .field("settings", &self.settings)
            .field("commands", &self.commands)
            .finish()
    }
}

impl DeviceManagerBuilder {
    /// operational store, in-memory by default
    pub fn store(mut self, store: Arc<dyn OperationalStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// what runs when a device becomes owned, device monitoring by default
    pub fn command_registration(mut self, registration: Arc<dyn CommandRegistration>) -> Self {
        self.registration = Some(registration);
        self
    }

    /// adds a command replayed on reconciliation, in order
    pub fn reconciliation_command(mut self, command: Arc<dyn TransactCommand>) -> Self {
        self.commands.push(command);
        self
    }

    /// the manager, not yet listening for ownership changes
    pub fn build(self) -> DeviceManager {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryOperationalStore::new()));
        let registration = self
            .registration
            .unwrap_or_else(|| Arc::new(MonitorRegistration));
        let entities = Arc::new(EntityIndex::new());
        let registry = Arc::new(ConnectionRegistry::new(
            entities.clone(),
            self.settings.database.as_str(),
        ));
        let arbiter = Arc::new(OwnershipArbiter::new(
            self.settings.clone(),
            self.service,
            registry.clone(),
            store.clone(),
            registration,
        ));
        DeviceManager {
            settings: self.settings,
            registry,
            entities,
            arbiter,
            store,
            commands: self.commands.into(),
            replays: Arc::new(ReplayTasks::new()),
            listener: Mutex::new(None),
            token: CancellationToken::new(),
        }
    }
}

/// Owns the registry, the arbiter and the running replays for this
/// controller.
pub struct DeviceManager {
    settings: DeviceSettings,
    registry: Arc<ConnectionRegistry>,
    entities: Arc<EntityIndex>,
    arbiter: Arc<OwnershipArbiter>,
    store: Arc<dyn OperationalStore>,
    commands: Arc<[Arc<dyn TransactCommand>]>,
    replays: Arc<ReplayTasks>,
    listener: Mutex<Option<OwnershipListener>>,
    token: CancellationToken,
}

impl std::fmt::Debug for DeviceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceManager")
            .field("settings", &self.settings)
            .field("registry", &self.registry)
            .field("replays", &self.replays)
            .finish()
    }
}

impl DeviceManager {
    /// builder using `service` for ownership
    pub fn builder(settings: DeviceSettings, service: Arc<dyn OwnershipService>) -> DeviceManagerBuilder {
        DeviceManagerBuilder {
            settings,
            service,
            store: None,
            registration: None,
            commands: Vec::new(),
        }
    }

    /// Subscribes to ownership changes for the configured entity type.
    pub fn start(&self) -> Result<()> {
        let listener = self.arbiter.clone().listen(self.token.child_token())?;
        info!(
            member = %self.settings.member,
            entity_type = %self.settings.entity_type,
            "device manager started"
        );
        if let Some(previous) = self.listener.lock().replace(listener) {
            previous.close();
        }
        Ok(())
    }

    /// Transport callback for a new session.
    pub async fn connected(&self, client: Client) -> Arc<ConnectionInstance> {
        match self.registry.on_connected(client).await {
            ConnectOutcome::Reused(instance) => instance,
            ConnectOutcome::Created { instance, replaced } => {
                if let Some(node_id) = replaced.and_then(|old| old.node_id()) {
                    self.replays.cancel(&node_id);
                }
                let outcome = self.arbiter.register_for_ownership(&instance).await;
                trace!(key = %instance.key(), ?outcome, "connected client");
                if outcome == CandidacyOutcome::Unresolved {
                    debug!(key = %instance.key(), "instance left unregistered");
                }
                instance
            }
        }
    }

    /// Transport callback for a closed session.
    pub fn disconnected(&self, client: &Client) {
        if let Some(instance) = self.registry.on_disconnected(client) {
            if let Some(node_id) = instance.node_id() {
                self.replays.cancel(&node_id);
            }
            trace!(key = %instance.key(), "disconnected client");
        }
    }

    /// registered instance for `key`
    pub fn connection(&self, key: impl Into<DeviceKey>) -> Option<Arc<ConnectionInstance>> {
        self.registry.get(key)
    }

    /// Runs the reconciliation commands for `node` through `connection` on a
    /// new task. A replay already running for the node is cancelled, and the
    /// new one stops when cancelled through
    /// [`stop_configuration_reconciliation`](ConfigurationReconciler::stop_configuration_reconciliation).
    pub fn reconcile(&self, connection: Arc<ConnectionInstance>, node: &DeviceNode) -> JoinHandle<()> {
        let node_id = node.node_id.clone();
        let (generation, token) = self.replays.start(node_id.clone());
        let replays = self.replays.clone();
        let store = self.store.clone();
        let commands = self.commands.clone();
        let events = vec![NodeModification::write(None, node.clone())];
        metrics::RECONCILIATION_RUNS.inc();

        tokio::spawn(async move {
            let replay = async {
                let state = store.snapshot(&node_id).await?;
                connection.execute(&commands, &state, &events).await?;
                anyhow::Ok(())
            };
            tokio::select! {
                _ = token.cancelled() => {
                    metrics::RECONCILIATION_CANCELLED.inc();
                    debug!(%node_id, "configuration replay cancelled");
                }
                res = replay => match res {
                    Ok(()) => debug!(%node_id, key = %connection.key(), "configuration replayed"),
                    Err(err) => warn!(%node_id, ?err, "configuration replay failed"),
                },
            }
            replays.finish(&node_id, generation);
        })
    }

    /// Forwards batches sent on the returned channel to a
    /// [`ReconciliationTrigger`] until the manager closes.
    pub fn spawn_reconciliation_trigger(
        self: &Arc<Self>,
        channel_size: usize,
    ) -> (mpsc::Sender<Vec<NodeModification>>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(channel_size);
        let handle = ReconciliationTrigger::new(self.clone()).spawn(rx, self.token.child_token());
        (tx, handle)
    }

    /// Stops listening, cancels replays and disconnects every device.
    pub async fn close(&self) {
        self.token.cancel();
        if let Some(listener) = self.listener.lock().take() {
            listener.close();
        }
        self.replays.cancel_all();

        // candidates still waiting for a notification are only in the entity index
        let mut instances = self.registry.instances();
        for candidate in self.entities.instances() {
            if !instances.iter().any(|instance| Arc::ptr_eq(instance, &candidate)) {
                instances.push(candidate);
            }
        }
        info!(devices = instances.len(), "closing device connections");
        join_all(instances.iter().map(|instance| instance.disconnect())).await;
        for instance in instances {
            self.registry.remove_instance(instance.key(), &instance);
            self.arbiter.unregister_for_ownership(&instance);
        }
    }

    /// the connection registry
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// the entity index shared by registry and arbiter
    pub fn entities(&self) -> &Arc<EntityIndex> {
        &self.entities
    }

    /// the ownership arbiter
    pub fn arbiter(&self) -> &Arc<OwnershipArbiter> {
        &self.arbiter
    }

    /// the running replays
    pub fn replays(&self) -> &ReplayTasks {
        &self.replays
    }

    /// the settings in use
    pub fn settings(&self) -> &DeviceSettings {
        &self.settings
    }
}

impl ConfigurationReconciler for DeviceManager {
    fn connection(&self, key: DeviceKey) -> Option<Arc<ConnectionInstance>> {
        self.registry.get(key)
    }

    fn reconcile_configuration(&self, connection: Arc<ConnectionInstance>, node: &DeviceNode) {
        drop(self.reconcile(connection, node));
    }

    fn stop_configuration_reconciliation(&self, node_id: &NodeId) {
        if self.replays.cancel(node_id) {
            debug!(%node_id, "configuration reconciliation stopped");
        }
    }
}
