//! In-process ownership service.
//!
//! A [`LocalCluster`] is shared by any number of named members. Each entity is
//! granted to its first candidate; when the owner withdraws, ownership passes
//! to the longest-standing remaining candidate. Every change is sent to every
//! listener registered for the entity's type, under the cluster lock, so all
//! listeners observe the same order.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::entity::{Entity, OwnershipChange, OwnershipState};
use crate::error::{OwnershipError, OwnershipResult};
use crate::service::{CandidateRegistration, ListenerRegistration, OwnershipService};

#[derive(Debug, Default)]
struct EntityRecord {
    /// Member names in registration order.
    candidates: Vec<String>,
    owner: Option<String>,
}

#[derive(Debug)]
struct Listener {
    id: u64,
    member: String,
    entity_type: String,
    sender: mpsc::UnboundedSender<OwnershipChange>,
}

#[derive(Debug, Default)]
struct ClusterState {
    entities: HashMap<Entity, EntityRecord>,
    listeners: Vec<Listener>,
    departed: Vec<String>,
    next_listener: u64,
}

impl ClusterState {
    fn notify(&mut self, entity: &Entity, previous: Option<&str>, current: Option<&str>) {
        debug!(%entity, ?previous, ?current, "ownership changed");
        self.listeners.retain(|listener| {
            if listener.entity_type != entity.entity_type() {
                return true;
            }
            let change = OwnershipChange::new(
                entity.clone(),
                previous == Some(listener.member.as_str()),
                current == Some(listener.member.as_str()),
                current.is_some(),
            );
            // a closed receiver means the listener is gone
            listener.sender.send(change).is_ok()
        });
    }

    fn withdraw(&mut self, entity: &Entity, member: &str) {
        let Some(record) = self.entities.get_mut(entity) else {
            return;
        };
        record.candidates.retain(|candidate| candidate != member);
        trace!(%entity, member, remaining = record.candidates.len(), "candidate withdrawn");
        if record.owner.as_deref() != Some(member) {
            return;
        }
        let previous = record.owner.take();
        record.owner = record.candidates.first().cloned();
        let current = record.owner.clone();
        if record.candidates.is_empty() {
            self.entities.remove(entity);
        }
        self.notify(entity, previous.as_deref(), current.as_deref());
    }
}

/// Shared state of an in-process cluster.
#[derive(Debug, Clone, Default)]
pub struct LocalCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl LocalCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for the member called `name`.
    pub fn member(&self, name: impl Into<String>) -> LocalOwnershipService {
        LocalOwnershipService {
            cluster: self.clone(),
            member: name.into(),
        }
    }

    /// Name of the member currently owning `entity`.
    pub fn owner(&self, entity: &Entity) -> Option<String> {
        self.state
            .lock()
            .entities
            .get(entity)
            .and_then(|record| record.owner.clone())
    }

    /// Candidates for `entity`, in registration order.
    pub fn candidates(&self, entity: &Entity) -> Vec<String> {
        self.state
            .lock()
            .entities
            .get(entity)
            .map(|record| record.candidates.clone())
            .unwrap_or_default()
    }

    /// Removes `member` from the cluster: all of its candidacies are withdrawn,
    /// its listeners dropped and further requests from it refused.
    pub fn leave(&self, member: &str) {
        let mut state = self.state.lock();
        let held: Vec<Entity> = state
            .entities
            .iter()
            .filter(|(_, record)| record.candidates.iter().any(|c| c == member))
            .map(|(entity, _)| entity.clone())
            .collect();
        state.listeners.retain(|listener| listener.member != member);
        for entity in held {
            state.withdraw(&entity, member);
        }
        state.departed.push(member.to_owned());
        debug!(member, "member left cluster");
    }
}

/// One member's view of a [`LocalCluster`].
#[derive(Debug, Clone)]
pub struct LocalOwnershipService {
    cluster: LocalCluster,
    member: String,
}

impl LocalOwnershipService {
    pub fn member(&self) -> &str {
        &self.member
    }

    pub fn cluster(&self) -> &LocalCluster {
        &self.cluster
    }

    fn check_member(&self, state: &ClusterState) -> OwnershipResult<()> {
        if state.departed.iter().any(|m| m == &self.member) {
            return Err(OwnershipError::Unavailable(format!(
                "member '{}' has left the cluster",
                self.member
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl OwnershipService for LocalOwnershipService {
    async fn register_candidate(&self, entity: &Entity) -> OwnershipResult<CandidateRegistration> {
        let mut state = self.cluster.state.lock();
        self.check_member(&state)?;

        let record = state.entities.entry(entity.clone()).or_default();
        if record.candidates.contains(&self.member) {
            return Err(OwnershipError::AlreadyRegistered(entity.clone()));
        }
        record.candidates.push(self.member.clone());
        trace!(%entity, member = %self.member, "candidate registered");
        if record.owner.is_none() {
            record.owner = Some(self.member.clone());
            state.notify(entity, None, Some(&self.member));
        }
        drop(state);

        let cluster = self.cluster.clone();
        let member = self.member.clone();
        let withdrawn = entity.clone();
        Ok(CandidateRegistration::new(entity.clone(), move || {
            cluster.state.lock().withdraw(&withdrawn, &member);
        }))
    }

    async fn ownership_state(&self, entity: &Entity) -> OwnershipResult<Option<OwnershipState>> {
        let state = self.cluster.state.lock();
        self.check_member(&state)?;
        Ok(state.entities.get(entity).map(|record| OwnershipState {
            has_owner: record.owner.is_some(),
            is_owner: record.owner.as_deref() == Some(self.member.as_str()),
        }))
    }

    fn register_listener(
        &self,
        entity_type: &str,
        sender: mpsc::UnboundedSender<OwnershipChange>,
    ) -> OwnershipResult<ListenerRegistration> {
        let mut state = self.cluster.state.lock();
        self.check_member(&state)?;
        let id = state.next_listener;
        state.next_listener += 1;
        state.listeners.push(Listener {
            id,
            member: self.member.clone(),
            entity_type: entity_type.to_owned(),
            sender,
        });
        drop(state);

        let cluster = self.cluster.clone();
        Ok(ListenerRegistration::new(entity_type, move || {
            cluster
                .state
                .lock()
                .listeners
                .retain(|listener| listener.id != id);
        }))
    }
}
