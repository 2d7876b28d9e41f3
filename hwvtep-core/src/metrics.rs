#![allow(missing_docs)]

//! # metrics
//!
//! connection, ownership and transaction statistics
use lazy_static::lazy_static;
use prometheus::{IntCounter, IntGauge, register_int_counter, register_int_gauge};

lazy_static! {
    /// # of device connections held in the registry
    pub static ref CONNECTED_DEVICES: IntGauge =
        register_int_gauge!("hwvtep_connected_devices", "count of registered device connections").unwrap();
    /// # of devices this instance owns
    pub static ref OWNED_DEVICES: IntGauge =
        register_int_gauge!("hwvtep_owned_devices", "count of devices owned by this instance").unwrap();

    pub static ref REPLACED_CONNECTIONS: IntCounter = register_int_counter!(
        "hwvtep_replaced_connections",
        "count of connections replaced by a new session from the same device"
    )
    .unwrap();

    /// ownership notifications received
    pub static ref OWNERSHIP_CHANGES: IntCounter =
        register_int_counter!("hwvtep_ownership_changes", "count of ownership notifications").unwrap();
    /// cleanup calls for entities with no owner and no local connection
    pub static ref UNRESOLVED_CLEANUPS: IntCounter = register_int_counter!(
        "hwvtep_unresolved_cleanups",
        "count of operational cleanups for ownerless entities"
    )
    .unwrap();

    pub static ref TRANSACTIONS_SUBMITTED: IntCounter =
        register_int_counter!("hwvtep_transactions_submitted", "count of submitted transactions").unwrap();
    pub static ref TRANSACTIONS_FAILED: IntCounter = register_int_counter!(
        "hwvtep_transactions_failed",
        "count of transactions with a transport, operation or commit error"
    )
    .unwrap();

    pub static ref RECONCILIATION_RUNS: IntCounter =
        register_int_counter!("hwvtep_reconciliation_runs", "count of configuration replays started").unwrap();
    pub static ref RECONCILIATION_CANCELLED: IntCounter = register_int_counter!(
        "hwvtep_reconciliation_cancelled",
        "count of configuration replays cancelled before completion"
    )
    .unwrap();
}
