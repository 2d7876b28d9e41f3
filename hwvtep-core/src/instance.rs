//! One live connection to one device.
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use entity_ownership::{CandidateRegistration, Entity};
use ovsdb_ops::{DatabaseSchema, Operation, OperationResult, Transact, TransactionResults, TransportError};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::client::{Client, same_client};
use crate::command::{InvokeError, TransactCommand, TransactInvoker};
use crate::key::{ConnectionInfo, DeviceKey};
use crate::node::{NodeId, NodeModification};
use crate::operational::OperationalState;

/// Where an instance stands with the ownership service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipPhase {
    /// no candidacy yet
    Unregistered,
    /// candidacy registered, ownership not known yet
    Candidate,
    /// another controller drives the device
    NotOwner,
    /// this controller drives the device
    Owner,
    /// disconnected or replaced; terminal
    Closed,
}

#[derive(Debug)]
struct OwnershipSlot {
    phase: OwnershipPhase,
    has_ownership: bool,
    entity: Option<Entity>,
    registration: Option<CandidateRegistration>,
    node_id: Option<NodeId>,
}

/// Wraps a transport handle with the device's key, cached schemas and its
/// ownership state.
///
/// The ownership flag only moves through ownership notifications handled by
/// the [`OwnershipArbiter`](crate::ownership::OwnershipArbiter).
#[derive(Debug)]
pub struct ConnectionInstance {
    key: DeviceKey,
    client: Client,
    database: String,
    schemas: Mutex<HashMap<String, Arc<DatabaseSchema>>>,
    slot: Mutex<OwnershipSlot>,
}

impl ConnectionInstance {
    /// new instance for `client`, with the node id if it is already known
    pub fn new(client: Client, node_id: Option<NodeId>, database: impl Into<String>) -> Self {
        Self {
            key: DeviceKey::from(client.connection_info()),
            client,
            database: database.into(),
            schemas: Mutex::new(HashMap::new()),
            slot: Mutex::new(OwnershipSlot {
                phase: OwnershipPhase::Unregistered,
                has_ownership: false,
                entity: None,
                registration: None,
                node_id,
            }),
        }
    }

    /// normalized key
    pub fn key(&self) -> DeviceKey {
        self.key
    }

    /// raw session endpoints
    pub fn connection_info(&self) -> ConnectionInfo {
        self.client.connection_info()
    }

    /// the transport handle
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// whether this instance wraps `client`
    pub fn has_client(&self, client: &Client) -> bool {
        same_client(&self.client, client)
    }

    /// device database this instance works on
    pub fn database(&self) -> &str {
        &self.database
    }

    /// logical node id, once known
    pub fn node_id(&self) -> Option<NodeId> {
        self.slot.lock().node_id.clone()
    }

    pub(crate) fn set_node_id(&self, node_id: NodeId) {
        self.slot.lock().node_id = Some(node_id);
    }

    /// entity this instance is a candidate for
    pub fn entity(&self) -> Option<Entity> {
        self.slot.lock().entity.clone()
    }

    pub(crate) fn set_entity(&self, entity: Entity) {
        self.slot.lock().entity = Some(entity);
    }

    /// whether this controller drives the device
    pub fn has_ownership(&self) -> bool {
        self.slot.lock().has_ownership
    }

    /// current ownership phase
    pub fn phase(&self) -> OwnershipPhase {
        self.slot.lock().phase
    }

    /// whether a candidacy is held
    pub fn has_registration(&self) -> bool {
        self.slot.lock().registration.is_some()
    }

    /// Applies an ownership notification. Returns the previous flag.
    pub(crate) fn set_has_ownership(&self, owner: bool) -> bool {
        let mut slot = self.slot.lock();
        let previous = std::mem::replace(&mut slot.has_ownership, owner);
        if slot.phase != OwnershipPhase::Closed {
            slot.phase = if owner {
                OwnershipPhase::Owner
            } else {
                OwnershipPhase::NotOwner
            };
        }
        previous
    }

    /// Stores the candidacy. A notification may already have resolved the
    /// phase, in which case it is kept.
    pub(crate) fn set_registration(&self, registration: CandidateRegistration) {
        let mut slot = self.slot.lock();
        if slot.phase == OwnershipPhase::Closed {
            drop(slot);
            registration.close();
            return;
        }
        slot.registration = Some(registration);
        if slot.phase == OwnershipPhase::Unregistered {
            slot.phase = OwnershipPhase::Candidate;
        }
    }

    /// Records that another controller owns the device.
    pub(crate) fn mark_owned_elsewhere(&self) {
        let mut slot = self.slot.lock();
        if slot.phase == OwnershipPhase::Candidate {
            slot.phase = OwnershipPhase::NotOwner;
        }
    }

    /// Closes the candidacy and moves to [`OwnershipPhase::Closed`].
    /// Returns whether an owning instance was closed by this call.
    pub(crate) fn close_registration(&self) -> bool {
        let (registration, was_owner) = {
            let mut slot = self.slot.lock();
            let open = std::mem::replace(&mut slot.phase, OwnershipPhase::Closed) != OwnershipPhase::Closed;
            (slot.registration.take(), open && slot.has_ownership)
        };
        // closing withdraws from the ownership service, keep it outside the lock
        if let Some(registration) = registration {
            debug!(key = %self.key, entity = %registration.entity(), "closing candidacy");
            registration.close();
        }
        was_owner
    }

    /// Schema of the instance's database, fetched once and cached.
    pub async fn schema(&self) -> Result<Arc<DatabaseSchema>, TransportError> {
        if let Some(schema) = self.schemas.lock().get(&self.database) {
            return Ok(schema.clone());
        }
        let schema = Arc::new(self.client.schema(&self.database).await?);
        trace!(key = %self.key, database = %self.database, version = schema.version(), "schema cached");
        self.schemas
            .lock()
            .insert(self.database.clone(), schema.clone());
        Ok(schema)
    }

    /// Subscribes to device-originated updates.
    pub async fn register_callbacks(&self) -> Result<(), TransportError> {
        debug!(key = %self.key, database = %self.database, "registering device callbacks");
        self.client.monitor(&self.database).await
    }

    /// Closes the transport session.
    pub async fn disconnect(&self) {
        self.client.disconnect().await;
    }

    /// Runs `commands` against `state` and `events` as one batch. See
    /// [`TransactInvoker`].
    pub async fn execute(
        &self,
        commands: &[Arc<dyn TransactCommand>],
        state: &OperationalState,
        events: &[NodeModification],
    ) -> Result<Option<TransactionResults>, InvokeError> {
        TransactInvoker::new(self).invoke(commands, state, events).await
    }
}

#[async_trait]
impl Transact for ConnectionInstance {
    async fn transact(
        &self,
        schema: &DatabaseSchema,
        operations: Vec<Operation>,
    ) -> Result<Vec<OperationResult>, TransportError> {
        self.client.transact(schema, operations).await
    }
}
