//! Binds connection instances to cluster entities and reacts to ownership
//! notifications.
//!
//! The arbiter never elects an owner. It registers candidacies, asks the
//! ownership service where an entity stands, and applies the notifications
//! the service sends. Notifications are consumed by a single task so they are
//! handled in the order the service produced them.
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use entity_ownership::{Entity, ListenerRegistration, OwnershipChange, OwnershipService};
use ovsdb_ops::{UUID_COLUMN, select_singleton_row};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::DeviceSettings;
use crate::instance::{ConnectionInstance, OwnershipPhase};
use crate::metrics;
use crate::node::NodeId;
use crate::operational::OperationalStore;
use crate::registry::{ConnectionRegistry, EntityIndex};

/// Comment attached to the device identification query.
const GLOBAL_QUERY_COMMENT: &str = "Fetching hardware_vtep table rows";

/// Makes a newly owned instance able to issue commands.
#[async_trait]
pub trait CommandRegistration: Send + Sync {
    /// called once per not-owner to owner transition, off the notification task
    async fn register(&self, instance: &Arc<ConnectionInstance>) -> Result<()>;
}

/// Subscribes to device-originated updates of the instance's database.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonitorRegistration;

#[async_trait]
impl CommandRegistration for MonitorRegistration {
    async fn register(&self, instance: &Arc<ConnectionInstance>) -> Result<()> {
        instance
            .register_callbacks()
            .await
            .with_context(|| format!("failed to monitor device {}", instance.key()))
    }
}

/// Result of [`OwnershipArbiter::register_for_ownership`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidacyOutcome {
    /// candidacy registered; `owned_elsewhere` when another controller owns the device
    Registered {
        /// another controller already owns the entity
        owned_elsewhere: bool,
    },
    /// this controller was already a candidate
    AlreadyRegistered,
    /// the device's entity could not be derived; nothing was registered
    Unresolved,
    /// the ownership service refused the candidacy
    Failed,
}

/// Result of [`OwnershipArbiter::on_ownership_changed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipOutcome {
    /// no local instance for the entity; `cleanups` operational cleanups ran
    Unresolved {
        /// number of cleanup calls made
        cleanups: usize,
    },
    /// ownership flag already matched
    Unchanged,
    /// this controller became the owner
    Granted,
    /// this controller stopped being the owner; not acted upon
    Revoked,
}

/// Ownership arbitration for the connections of this controller.
pub struct OwnershipArbiter {
    settings: DeviceSettings,
    service: Arc<dyn OwnershipService>,
    registry: Arc<ConnectionRegistry>,
    entities: Arc<EntityIndex>,
    store: Arc<dyn OperationalStore>,
    commands: Arc<dyn CommandRegistration>,
}

impl std::fmt::Debug for OwnershipArbiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnershipArbiter")
            .field("settings", &self.settings)
            .field("entities", &self.entities.len())
            .finish()
    }
}

impl OwnershipArbiter {
    /// arbiter sharing `registry` and its entity index
    pub fn new(
        settings: DeviceSettings,
        service: Arc<dyn OwnershipService>,
        registry: Arc<ConnectionRegistry>,
        store: Arc<dyn OperationalStore>,
        commands: Arc<dyn CommandRegistration>,
    ) -> Self {
        let entities = registry.entities().clone();
        Self {
            settings,
            service,
            registry,
            entities,
            store,
            commands,
        }
    }

    /// Registers `instance` as a candidate owner of its device.
    ///
    /// The entity comes from the instance's node id, or from the device's
    /// global row when the node id is not known yet. That query is a full
    /// round trip to the device and is only made on this connect path. If
    /// it fails nothing is registered and the instance stays uncached.
    pub async fn register_for_ownership(&self, instance: &Arc<ConnectionInstance>) -> CandidacyOutcome {
        let key = instance.key();
        let entity = match self.entity_for(instance).await {
            Ok(entity) => entity,
            Err(err) => {
                warn!(%key, ?err, "unable to derive entity, skipping ownership registration");
                return CandidacyOutcome::Unresolved;
            }
        };

        self.entities.insert(entity.clone(), instance.clone());
        instance.set_entity(entity.clone());

        match self.service.register_candidate(&entity).await {
            Ok(registration) => {
                instance.set_registration(registration);
                info!(%key, %entity, "device entity registered for ownership");
            }
            Err(err) if err.is_conflict() => {
                warn!(%key, %entity, "entity was already registered for ownership");
                return CandidacyOutcome::AlreadyRegistered;
            }
            Err(err) => {
                error!(%key, %entity, ?err, "ownership candidacy failed");
                self.entities.remove(&entity, instance);
                return CandidacyOutcome::Failed;
            }
        }

        // an entity that already has an owner sends no notification
        match self.service.ownership_state(&entity).await {
            Ok(Some(state)) if state.has_owner && !state.is_owner => {
                info!(
                    %key,
                    %entity,
                    "entity already owned by another instance, this instance is not the owner"
                );
                instance.mark_owned_elsewhere();
                self.registry.put(key, instance.clone());
                CandidacyOutcome::Registered { owned_elsewhere: true }
            }
            Ok(state) => {
                trace!(%key, %entity, ?state, "ownership state after registration");
                CandidacyOutcome::Registered { owned_elsewhere: false }
            }
            Err(err) => {
                warn!(%key, %entity, ?err, "unable to query ownership state");
                CandidacyOutcome::Registered { owned_elsewhere: false }
            }
        }
    }

    async fn entity_for(&self, instance: &ConnectionInstance) -> Result<Entity> {
        if let Some(node_id) = instance.node_id() {
            return Ok(node_id.to_entity(&self.settings.entity_type));
        }

        let schema = instance
            .schema()
            .await
            .with_context(|| format!("failed to fetch schema {}", self.settings.database))?;
        let row = select_singleton_row(
            instance,
            schema,
            &self.settings.global_table,
            GLOBAL_QUERY_COMMENT,
        )
        .await
        .with_context(|| format!("failed to read {} table", self.settings.global_table))?;
        let uuid = row
            .as_ref()
            .and_then(|row| row.get(UUID_COLUMN))
            .and_then(|value| value.as_uuid())
            .ok_or_else(|| anyhow!("device has no {} row", self.settings.global_table))?;

        let node_id = NodeId::from_global_uuid(uuid);
        info!(key = %instance.key(), %node_id, "node id generated for device connection");
        instance.set_node_id(node_id.clone());
        self.registry.put_node_id(instance.key(), node_id.clone());
        Ok(node_id.to_entity(&self.settings.entity_type))
    }

    /// Closes the candidacy of `instance` and removes its entity mapping.
    pub fn unregister_for_ownership(&self, instance: &Arc<ConnectionInstance>) {
        self.entities.retract(instance);
    }

    /// Applies one ownership notification.
    ///
    /// The ownership flag is updated before returning. Command registration
    /// for a granted device runs on its own task and may finish later.
    pub async fn on_ownership_changed(&self, change: OwnershipChange) -> OwnershipOutcome {
        metrics::OWNERSHIP_CHANGES.inc();
        let entity = &change.entity;
        let Some(instance) = self.entities.get(entity) else {
            if change.is_owner {
                warn!(%entity, ?change, "no connection instance for owned entity");
            } else {
                debug!(%entity, ?change, "no connection instance for entity");
            }
            return OwnershipOutcome::Unresolved {
                cleanups: self.cleanup_ownerless(&change).await,
            };
        };
        info!(key = %instance.key(), ?change, "ownership change received");

        if instance.phase() == OwnershipPhase::Closed {
            debug!(key = %instance.key(), %entity, "instance already closed");
            return OwnershipOutcome::Unchanged;
        }
        // connection bookkeeping does not depend on the outcome
        self.registry.put(instance.key(), instance.clone());

        if change.is_owner == instance.has_ownership() {
            debug!(
                key = %instance.key(),
                has_ownership = change.is_owner,
                "no change in ownership"
            );
            return OwnershipOutcome::Unchanged;
        }

        instance.set_has_ownership(change.is_owner);
        if change.is_owner {
            info!(key = %instance.key(), %entity, "this instance is owner of the device");
            metrics::OWNED_DEVICES.inc();
            // a slow device must not hold up notifications for the others
            let commands = self.commands.clone();
            tokio::spawn(async move {
                if let Err(err) = commands.register(&instance).await {
                    error!(key = %instance.key(), ?err, "failed to register device callbacks");
                }
            });
            OwnershipOutcome::Granted
        } else {
            // revocation needs a rebalancing policy to unregister callbacks
            error!(
                key = %instance.key(),
                node_id = ?instance.node_id(),
                "this instance is no longer the owner of the device"
            );
            metrics::OWNED_DEVICES.dec();
            OwnershipOutcome::Revoked
        }
    }

    /// Cleans up an entity nobody owns. The previous owner's path goes
    /// first; the second call is expected to find nothing left.
    async fn cleanup_ownerless(&self, change: &OwnershipChange) -> usize {
        if change.has_owner {
            return 0;
        }
        debug!(entity = %change.entity, "entity has no owner, cleaning up operational state");
        let mut cleanups = 0;
        if change.was_owner {
            self.cleanup(&change.entity).await;
            cleanups += 1;
        }
        self.cleanup(&change.entity).await;
        cleanups + 1
    }

    async fn cleanup(&self, entity: &Entity) {
        metrics::UNRESOLVED_CLEANUPS.inc();
        if let Err(err) = self.store.cleanup(entity).await {
            warn!(%entity, ?err, "operational cleanup failed");
        }
    }

    /// Subscribes to notifications for the device entity type and handles
    /// them on a dedicated task until `token` is cancelled.
    pub fn listen(self: Arc<Self>, token: CancellationToken) -> Result<OwnershipListener> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let registration = self
            .service
            .register_listener(&self.settings.entity_type, tx)
            .context("failed to register ownership listener")?;
        debug!(entity_type = %self.settings.entity_type, "ownership listener registered");

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    change = rx.recv() => match change {
                        Some(change) => {
                            self.on_ownership_changed(change).await;
                        }
                        None => break,
                    },
                }
            }
            debug!("ownership listener stopped");
        });
        Ok(OwnershipListener {
            registration: Some(registration),
            task,
        })
    }
}

/// Running ownership listener. Closing or dropping it unsubscribes and stops
/// the task.
#[derive(Debug)]
pub struct OwnershipListener {
    registration: Option<ListenerRegistration>,
    task: JoinHandle<()>,
}

impl OwnershipListener {
    /// unsubscribe and stop handling notifications
    pub fn close(mut self) {
        if let Some(registration) = self.registration.take() {
            registration.close();
        }
        self.task.abort();
    }

    /// whether the handling task has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for OwnershipListener {
    fn drop(&mut self) {
        trace!("OwnershipListener drop called");
        self.task.abort();
    }
}
