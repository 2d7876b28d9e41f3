//! Transact commands and the invoker composing them into one batch.
use std::fmt;
use std::sync::Arc;

use ovsdb_ops::{ConstructionError, TransactError, TransactionBuilder, TransactionResults};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::instance::{ConnectionInstance, OwnershipPhase};
use crate::key::DeviceKey;
use crate::metrics;
use crate::node::NodeModification;
use crate::operational::OperationalState;

/// Translates state-change events into operations.
///
/// A command only appends to the builder it is handed, never submits it, so
/// several commands can share one batch. Events may be delivered more than
/// once; appending for an event already reflected in `state` must not change
/// the device twice.
pub trait TransactCommand: Send + Sync + fmt::Debug {
    /// queue the operations for `events` given the device's current `state`
    fn execute(
        &self,
        tx: &mut TransactionBuilder,
        state: &OperationalState,
        events: &[NodeModification],
    ) -> Result<(), ConstructionError>;
}

/// Why a batch of commands was not applied.
#[derive(Debug, Error)]
pub enum InvokeError {
    /// only the owning controller may write to a device
    #[error("device {0} is not owned by this instance")]
    NotOwner(DeviceKey),

    /// the instance was disconnected or replaced
    #[error("connection to device {0} is closed")]
    Closed(DeviceKey),

    /// building, delivering or applying the batch failed
    #[error(transparent)]
    Transact(#[from] TransactError),
}

impl InvokeError {
    /// whether the device connection itself went away
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, InvokeError::Transact(TransactError::Transport(err)) if err.is_connection_loss())
    }
}

/// Composes commands into a single transaction against one instance.
#[derive(Debug, Clone, Copy)]
pub struct TransactInvoker<'a> {
    instance: &'a ConnectionInstance,
}

impl<'a> TransactInvoker<'a> {
    /// invoker for `instance`
    pub fn new(instance: &'a ConnectionInstance) -> Self {
        Self { instance }
    }

    /// Runs every command into one builder and submits it.
    ///
    /// Returns `Ok(None)` without contacting the device when no command
    /// queued anything. Closed and not-owned instances are refused before
    /// any command runs. Nothing is retried here.
    pub async fn invoke(
        &self,
        commands: &[Arc<dyn TransactCommand>],
        state: &OperationalState,
        events: &[NodeModification],
    ) -> Result<Option<TransactionResults>, InvokeError> {
        let key = self.instance.key();
        if self.instance.phase() == OwnershipPhase::Closed {
            debug!(%key, "skipping commands, connection closed");
            return Err(InvokeError::Closed(key));
        }
        if !self.instance.has_ownership() {
            debug!(%key, "skipping commands, device not owned");
            return Err(InvokeError::NotOwner(key));
        }

        let schema = self
            .instance
            .schema()
            .await
            .map_err(TransactError::from)?;
        let mut tx = TransactionBuilder::new(schema);
        for command in commands {
            command
                .execute(&mut tx, state, events)
                .map_err(TransactError::from)?;
        }
        if tx.is_empty() {
            trace!(%key, commands = commands.len(), "nothing to submit");
            return Ok(None);
        }

        metrics::TRANSACTIONS_SUBMITTED.inc();
        let operations = tx.len();
        let results = tx
            .submit(self.instance)
            .await
            .map_err(TransactError::from)
            .and_then(TransactionResults::check)
            .inspect_err(|err| {
                metrics::TRANSACTIONS_FAILED.inc();
                warn!(%key, ?err, "transaction failed");
            })?;
        debug!(%key, operations, "transaction applied");
        Ok(Some(results))
    }
}
