//! Transport handle to one device.
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use ovsdb_ops::{DatabaseSchema, Operation, OperationResult, TransportError};

use crate::key::ConnectionInfo;

/// A live session with a device, provided by the transport layer.
///
/// Once the session is gone every pending and future call must resolve to a
/// [`TransportError`]; this layer has no timeouts of its own.
#[async_trait]
pub trait DeviceClient: Send + Sync + fmt::Debug {
    /// endpoints of the session
    fn connection_info(&self) -> ConnectionInfo;

    /// fetches the schema of `database`
    async fn schema(&self, database: &str) -> Result<DatabaseSchema, TransportError>;

    /// submits one batch; see [`ovsdb_ops::Transact`]
    async fn transact(
        &self,
        schema: &DatabaseSchema,
        operations: Vec<Operation>,
    ) -> Result<Vec<OperationResult>, TransportError>;

    /// subscribes to device-originated updates of `database`
    async fn monitor(&self, database: &str) -> Result<(), TransportError>;

    /// closes the session
    async fn disconnect(&self);
}

/// Shared transport handle.
pub type Client = Arc<dyn DeviceClient>;

/// Whether two handles are the same session.
pub fn same_client(a: &Client, b: &Client) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
