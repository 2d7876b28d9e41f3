//! # hwvtep-core
//!
//! Southbound connection handling for hardware VTEP devices driven by a
//! cluster of controllers. Every controller keeps its own connections, the
//! cluster ownership service picks the one that drives each device, and only
//! that controller issues transactions to it.
#![warn(
    missing_debug_implementations,
    missing_docs,
    missing_copy_implementations,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![allow(clippy::cognitive_complexity)]
#![deny(rustdoc::broken_intra_doc_links)]
#![doc(test(
    no_crate_inject,
    attr(deny(warnings, rust_2018_idioms), allow(dead_code, unused_variables))
))]
pub use anyhow;
pub use async_trait::async_trait;
pub use entity_ownership;
pub use ovsdb_ops;
pub use tokio;
pub use tokio_util;
pub use tracing;

pub use crate::manager::DeviceManager;

pub mod client;
pub mod command;
pub mod config;
pub mod env;
pub mod instance;
pub mod key;
pub mod manager;
pub mod metrics;
pub mod node;
pub mod operational;
pub mod ownership;
pub mod prelude;
pub mod reconciliation;
pub mod registry;
