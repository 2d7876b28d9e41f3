//! hwvtep prelude

pub use crate::{
    anyhow::{self, Context, Result},
    async_trait,
    client::{Client, DeviceClient},
    command::TransactCommand,
    instance::ConnectionInstance,
    key::{ConnectionInfo, DeviceKey},
    node::{DeviceNode, NodeId, NodeModification},
    operational::{OperationalState, OperationalStore},
    ovsdb_ops,
    tokio,
    tracing::{self, debug, error, info, instrument, trace, warn},
};

pub use std::sync::Arc;
