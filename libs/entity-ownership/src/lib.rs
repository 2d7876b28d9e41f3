//! # entity-ownership
//!
//! Contract between controller instances and the cluster service that decides
//! which instance owns an entity.
//!
//! This library provides:
//! - **Entities** and the ownership notifications delivered for them.
//! - **[`OwnershipService`]**: candidacy, ownership queries and listener
//!   registration. Registrations are guards that withdraw on close or drop.
//! - **[`LocalCluster`]**: an in-process service granting each entity to its
//!   first candidate and handing it over when the owner withdraws.
//!
//! Notifications are sent on a `tokio` channel so every listener sees the
//! changes for an entity in the order the service made them.

pub mod entity;
pub mod error;
pub mod local;
pub mod service;

pub use entity::{Entity, OwnershipChange, OwnershipState};
pub use error::{OwnershipError, OwnershipResult};
pub use local::{LocalCluster, LocalOwnershipService};
pub use service::{CandidateRegistration, ListenerRegistration, OwnershipService};
