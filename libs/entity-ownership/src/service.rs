use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::entity::{Entity, OwnershipChange, OwnershipState};
use crate::error::OwnershipResult;

/// The cluster service arbitrating entity ownership.
///
/// The service elects; callers only register intent and react to the
/// [`OwnershipChange`]s delivered to their listener.
#[async_trait]
pub trait OwnershipService: Send + Sync {
    /// Registers this member as a candidate owner of `entity`.
    ///
    /// Fails with [`AlreadyRegistered`](crate::OwnershipError::AlreadyRegistered)
    /// if this member is already a candidate.
    async fn register_candidate(&self, entity: &Entity) -> OwnershipResult<CandidateRegistration>;

    /// Current ownership of `entity`, `None` if the service knows nothing of it.
    async fn ownership_state(&self, entity: &Entity) -> OwnershipResult<Option<OwnershipState>>;

    /// Delivers every change for entities of `entity_type` to `sender`.
    fn register_listener(
        &self,
        entity_type: &str,
        sender: mpsc::UnboundedSender<OwnershipChange>,
    ) -> OwnershipResult<ListenerRegistration>;
}

type Release = Box<dyn FnOnce() + Send>;

/// A live candidacy. Withdrawn on [`close`](Self::close) or drop.
pub struct CandidateRegistration {
    entity: Entity,
    release: Option<Release>,
}

impl CandidateRegistration {
    pub fn new(entity: Entity, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            entity,
            release: Some(Box::new(release)),
        }
    }

    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for CandidateRegistration {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for CandidateRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CandidateRegistration")
            .field("entity", &self.entity)
            .field("open", &self.release.is_some())
            .finish()
    }
}

/// A listener subscription. Removed on [`close`](Self::close) or drop.
pub struct ListenerRegistration {
    entity_type: String,
    release: Option<Release>,
}

impl ListenerRegistration {
    pub fn new(entity_type: impl Into<String>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            entity_type: entity_type.into(),
            release: Some(Box::new(release)),
        }
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn close(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for ListenerRegistration {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for ListenerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("entity_type", &self.entity_type)
            .finish()
    }
}
