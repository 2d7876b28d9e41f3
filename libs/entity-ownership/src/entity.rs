use std::fmt;

use serde::{Deserialize, Serialize};

/// A cluster-wide ownership token: a type tag plus a globally unique id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entity {
    entity_type: String,
    id: String,
}

impl Entity {
    pub fn new(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.id)
    }
}

/// Current ownership of an entity as seen by one member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipState {
    /// Some member owns the entity.
    pub has_owner: bool,
    /// The asking member owns the entity.
    pub is_owner: bool,
}

/// Notification that ownership of `entity` changed, relative to the
/// receiving member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipChange {
    pub entity: Entity,
    pub was_owner: bool,
    pub is_owner: bool,
    pub has_owner: bool,
}

impl OwnershipChange {
    pub fn new(entity: Entity, was_owner: bool, is_owner: bool, has_owner: bool) -> Self {
        Self {
            entity,
            was_owner,
            is_owner,
            has_owner,
        }
    }

    /// The receiving member gained ownership.
    pub fn is_granted(&self) -> bool {
        !self.was_owner && self.is_owner
    }

    /// The receiving member lost ownership.
    pub fn is_revoked(&self) -> bool {
        self.was_owner && !self.is_owner
    }
}
