//! Error types for the ownership service.

use thiserror::Error;

use crate::entity::Entity;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OwnershipError {
    /// This member already holds a candidacy for the entity.
    #[error("candidate already registered for {0}")]
    AlreadyRegistered(Entity),

    /// The service cannot take requests, e.g. the member has left the cluster.
    #[error("ownership service unavailable: {0}")]
    Unavailable(String),
}

impl OwnershipError {
    /// Returns true if the request failed only because it was already satisfied.
    pub fn is_conflict(&self) -> bool {
        matches!(self, OwnershipError::AlreadyRegistered(_))
    }
}

pub type OwnershipResult<T> = Result<T, OwnershipError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let dup = OwnershipError::AlreadyRegistered(Entity::new("hwvtep", "a"));
        assert!(dup.is_conflict());
        assert_eq!(dup.to_string(), "candidate already registered for hwvtep:a");

        let down = OwnershipError::Unavailable("member left".into());
        assert!(!down.is_conflict());
    }
}
